//! Certificate issuer
//!
//! Mints one certificate per (user, course), exactly once, when the course
//! first becomes complete. The (user, course) primary key is the idempotency
//! boundary; a repeat call hands back the existing certificate. Codes are
//! shareable strings like `CERT-20260308-4F2A9C1B`, unique across the table
//! and regenerated on the off chance of a collision.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::db::{ProgressDb, now_ms};
use super::models::{Certificate, CourseProgress};
use crate::error::Result;

/// Attempts before giving up on finding an unused code
const CODE_RETRY_LIMIT: usize = 8;

#[derive(Clone)]
pub struct CertificateIssuer {
    db: ProgressDb,
}

impl CertificateIssuer {
    pub fn new(db: ProgressDb) -> Self {
        Self { db }
    }

    /// Issue a certificate if the course is complete
    ///
    /// Returns `None` for an incomplete course. For a complete one, returns
    /// the certificate and whether this call created it.
    pub fn issue_if_eligible(
        &self,
        user_id: &str,
        course_id: &str,
        progress: &CourseProgress,
    ) -> Result<Option<(Certificate, bool)>> {
        let conn = self.db.conn();
        let tx = conn.unchecked_transaction()?;
        let issued = Self::issue_tx(&tx, user_id, course_id, progress)?;
        tx.commit()?;
        Ok(issued)
    }

    /// Look a certificate up by its shareable code
    pub fn verify(&self, code: &str) -> Result<Option<Certificate>> {
        let conn = self.db.conn();
        let cert = conn
            .query_row(
                "SELECT user_id, course_id, code, issued_at FROM certificates WHERE code = ?1",
                params![code],
                certificate_from_row,
            )
            .optional()?;
        Ok(cert)
    }

    /// All certificates for a user, newest first
    pub fn for_user(&self, user_id: &str) -> Result<Vec<Certificate>> {
        let conn = self.db.conn();
        Self::for_user_tx(&conn, user_id)
    }

    pub(crate) fn issue_tx(
        conn: &Connection,
        user_id: &str,
        course_id: &str,
        progress: &CourseProgress,
    ) -> Result<Option<(Certificate, bool)>> {
        if !progress.is_complete {
            return Ok(None);
        }

        if let Some(existing) = Self::get_tx(conn, user_id, course_id)? {
            return Ok(Some((existing, false)));
        }

        let issued_at = now_ms();
        let mut last_err = rusqlite::Error::QueryReturnedNoRows;
        for _ in 0..CODE_RETRY_LIMIT {
            let code = generate_code();
            match conn.execute(
                "INSERT INTO certificates (user_id, course_id, code, issued_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, course_id, code, issued_at],
            ) {
                Ok(_) => {
                    debug!(user = user_id, course = course_id, %code, "certificate issued");
                    return Ok(Some((
                        Certificate {
                            user_id: user_id.to_string(),
                            course_id: course_id.to_string(),
                            code,
                            issued_at,
                        },
                        true,
                    )));
                }
                Err(rusqlite::Error::SqliteFailure(e, msg))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    // Another writer beat us to the (user, course) pair, or
                    // the random code collided. The first wins; the second
                    // just needs a fresh code.
                    if let Some(existing) = Self::get_tx(conn, user_id, course_id)? {
                        return Ok(Some((existing, false)));
                    }
                    last_err = rusqlite::Error::SqliteFailure(e, msg);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err.into())
    }

    pub(crate) fn get_tx(
        conn: &Connection,
        user_id: &str,
        course_id: &str,
    ) -> Result<Option<Certificate>> {
        let cert = conn
            .query_row(
                "SELECT user_id, course_id, code, issued_at FROM certificates
                 WHERE user_id = ?1 AND course_id = ?2",
                params![user_id, course_id],
                certificate_from_row,
            )
            .optional()?;
        Ok(cert)
    }

    pub(crate) fn for_user_tx(conn: &Connection, user_id: &str) -> Result<Vec<Certificate>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, course_id, code, issued_at FROM certificates
             WHERE user_id = ?1 ORDER BY issued_at DESC",
        )?;
        let certs = stmt
            .query_map(params![user_id], certificate_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(certs)
    }
}

fn certificate_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Certificate> {
    Ok(Certificate {
        user_id: row.get(0)?,
        course_id: row.get(1)?,
        code: row.get(2)?,
        issued_at: row.get(3)?,
    })
}

/// Generate a shareable certificate code: date prefix plus random suffix
fn generate_code() -> String {
    let mut bytes = [0u8; 4];
    if getrandom::getrandom(&mut bytes).is_err() {
        // Fallback: best-effort entropy if the OS RNG is unavailable
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        bytes = ((nanos as u32) ^ std::process::id().rotate_left(17)).to_le_bytes();
    }
    format!(
        "CERT-{}-{}",
        Utc::now().format("%Y%m%d"),
        hex_encode_upper(&bytes)
    )
}

fn hex_encode_upper(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}
