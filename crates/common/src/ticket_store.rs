//! Ticket cache with an optional durable mirror.
//!
//! [`TicketStore`] holds the current [`AuthenticationTicket`] in memory and
//! mirrors every replacement to a [`TicketRecord`]. It makes no decisions:
//! when to refresh or fall back is up to
//! [`TicketAuthority`](crate::ticket_authority::TicketAuthority).
//!
//! [`FileTicketRecord`] keeps one JSON file per service
//! (`<dir>/<service>.ticket.json`). Writes go to a temporary sibling and are
//! renamed into place so readers in other processes never see a partial file.

use crate::secret::{ExposeSecret, SecretString};
use crate::ticket::{AuthenticationTicket, TicketError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Durable slot for the current ticket.
#[async_trait]
pub trait TicketRecord: Send + Sync {
    /// Read the stored ticket, if any.
    async fn load(&self) -> Result<Option<AuthenticationTicket>, TicketError>;

    /// Atomically replace the stored ticket.
    async fn save(&self, ticket: &AuthenticationTicket) -> Result<(), TicketError>;
}

/// In-process holder of the current ticket.
pub struct TicketStore {
    current: RwLock<Option<AuthenticationTicket>>,
    record: Option<Arc<dyn TicketRecord>>,
}

impl std::fmt::Debug for TicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketStore")
            .field("current", &self.current())
            .field("persistent", &self.record.is_some())
            .finish()
    }
}

impl TicketStore {
    /// Store mirrored to `record`.
    #[must_use]
    pub fn new(record: Arc<dyn TicketRecord>) -> Self {
        Self {
            current: RwLock::new(None),
            record: Some(record),
        }
    }

    /// Store without a durable mirror.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(None),
            record: None,
        }
    }

    /// Store pre-seeded with `ticket` and no durable mirror.
    #[must_use]
    pub fn with_ticket(ticket: AuthenticationTicket) -> Self {
        Self {
            current: RwLock::new(Some(ticket)),
            record: None,
        }
    }

    /// The current ticket, valid or not.
    #[must_use]
    pub fn current(&self) -> Option<AuthenticationTicket> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current ticket and mirror it to durable storage.
    ///
    /// The in-memory value is replaced before the write, so a persistence
    /// failure leaves the new ticket usable in this process.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::Persistence` if the durable write fails.
    pub async fn set(&self, ticket: AuthenticationTicket) -> Result<(), TicketError> {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(ticket.clone());

        match &self.record {
            Some(record) => record.save(&ticket).await,
            None => Ok(()),
        }
    }

    /// `now + safety_margin < ticket.expires_at`.
    #[must_use]
    pub fn is_valid(ticket: &AuthenticationTicket, safety_margin: Duration) -> bool {
        ticket.is_valid_at(Utc::now(), safety_margin)
    }

    /// Load the durable record into memory (startup).
    ///
    /// Only an unexpired record is adopted.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::Persistence` if the record cannot be read.
    pub async fn hydrate(&self) -> Result<Option<AuthenticationTicket>, TicketError> {
        let Some(record) = &self.record else {
            return Ok(None);
        };

        match record.load().await? {
            Some(ticket) if Self::is_valid(&ticket, Duration::ZERO) => {
                info!(
                    target: "common.ticket_store",
                    expires_at = %ticket.expires_at(),
                    "Reusing persisted ticket"
                );
                self.adopt_if_newer(&ticket);
                Ok(Some(ticket))
            }
            Some(ticket) => {
                debug!(
                    target: "common.ticket_store",
                    expires_at = %ticket.expires_at(),
                    "Persisted ticket already expired"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Re-read the durable record and adopt it if it outlives the in-memory
    /// ticket. Returns the resulting current ticket.
    ///
    /// Read failures are logged and the in-memory value is kept.
    pub async fn reload(&self) -> Option<AuthenticationTicket> {
        if let Some(record) = &self.record {
            match record.load().await {
                Ok(Some(ticket)) => self.adopt_if_newer(&ticket),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        target: "common.ticket_store",
                        error = %e,
                        "Failed to re-read ticket record"
                    );
                }
            }
        }
        self.current()
    }

    fn adopt_if_newer(&self, candidate: &AuthenticationTicket) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let newer = current
            .as_ref()
            .map_or(true, |existing| candidate.expires_at() > existing.expires_at());
        if newer {
            *current = Some(candidate.clone());
        }
    }
}

/// On-disk representation of a ticket.
#[derive(Serialize, Deserialize)]
struct StoredTicket {
    service: String,
    token: String,
    sign: String,
    generated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// JSON file record keyed by service id.
#[derive(Debug, Clone)]
pub struct FileTicketRecord {
    service: String,
    path: PathBuf,
}

impl FileTicketRecord {
    /// Record for `service` inside `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>, service: impl Into<String>) -> Self {
        let service = service.into();
        let path = dir.as_ref().join(format!("{service}.ticket.json"));
        Self { service, path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TicketRecord for FileTicketRecord {
    async fn load(&self) -> Result<Option<AuthenticationTicket>, TicketError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TicketError::Persistence(format!(
                    "read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let stored: StoredTicket = serde_json::from_slice(&bytes).map_err(|e| {
            TicketError::Persistence(format!("parse {}: {e}", self.path.display()))
        })?;

        if stored.service != self.service {
            warn!(
                target: "common.ticket_store",
                expected = %self.service,
                found = %stored.service,
                "Ticket record belongs to another service, ignoring"
            );
            return Ok(None);
        }

        AuthenticationTicket::new(
            SecretString::from(stored.token),
            SecretString::from(stored.sign),
            stored.generated_at,
            stored.expires_at,
        )
        .map(Some)
    }

    async fn save(&self, ticket: &AuthenticationTicket) -> Result<(), TicketError> {
        let stored = StoredTicket {
            service: self.service.clone(),
            token: ticket.token().expose_secret().to_string(),
            sign: ticket.sign().expose_secret().to_string(),
            generated_at: ticket.generated_at(),
            expires_at: ticket.expires_at(),
        };
        let bytes = serde_json::to_vec_pretty(&stored)
            .map_err(|e| TicketError::Persistence(format!("serialize ticket: {e}")))?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                TicketError::Persistence(format!("create {}: {e}", dir.display()))
            })?;
        }

        let tmp = self.path.with_extension(format!("json.{}.tmp", std::process::id()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| TicketError::Persistence(format!("write {}: {e}", tmp.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| {
                    TicketError::Persistence(format!("chmod {}: {e}", tmp.display()))
                })?;
        }

        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            TicketError::Persistence(format!("rename to {}: {e}", self.path.display()))
        })?;

        debug!(
            target: "common.ticket_store",
            path = %self.path.display(),
            expires_at = %ticket.expires_at(),
            "Ticket record written"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ticket(token: &str, expires_in: chrono::Duration) -> AuthenticationTicket {
        let now = Utc::now();
        AuthenticationTicket::new(
            SecretString::from(token),
            SecretString::from(format!("{token}-sign")),
            now - chrono::Duration::minutes(1),
            now + expires_in,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_set_replaces_current() {
        let store = TicketStore::in_memory();
        assert!(store.current().is_none());

        store
            .set(ticket("first", chrono::Duration::hours(1)))
            .await
            .unwrap();
        store
            .set(ticket("second", chrono::Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(store.current().unwrap().token().expose_secret(), "second");
    }

    #[tokio::test]
    async fn test_file_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let record = FileTicketRecord::new(dir.path(), "wsfe");
        let original = ticket("persisted", chrono::Duration::hours(12));

        record.save(&original).await.unwrap();
        let loaded = record.load().await.unwrap().unwrap();

        assert!(loaded.same_as(&original));
        assert!(record.path().ends_with("wsfe.ticket.json"));
    }

    #[tokio::test]
    async fn test_file_record_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let record = FileTicketRecord::new(dir.path(), "wsfe");
        assert!(record.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_record_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let record = FileTicketRecord::new(dir.path(), "wsfe");
        tokio::fs::write(record.path(), b"{not json").await.unwrap();

        assert!(matches!(
            record.load().await,
            Err(TicketError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn test_file_record_ignores_other_service() {
        let dir = tempfile::tempdir().unwrap();
        FileTicketRecord::new(dir.path(), "wsfe")
            .save(&ticket("wsfe-ticket", chrono::Duration::hours(1)))
            .await
            .unwrap();
        tokio::fs::rename(
            dir.path().join("wsfe.ticket.json"),
            dir.path().join("wsmtxca.ticket.json"),
        )
        .await
        .unwrap();

        let other = FileTicketRecord::new(dir.path(), "wsmtxca");
        assert!(other.load().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_record_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let record = FileTicketRecord::new(dir.path(), "wsfe");
        record
            .save(&ticket("secret", chrono::Duration::hours(1)))
            .await
            .unwrap();

        let mode = std::fs::metadata(record.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_set_mirrors_to_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = Arc::new(FileTicketRecord::new(dir.path(), "wsfe"));
        let store = TicketStore::new(record.clone());

        store
            .set(ticket("mirrored", chrono::Duration::hours(1)))
            .await
            .unwrap();

        let on_disk = record.load().await.unwrap().unwrap();
        assert_eq!(on_disk.token().expose_secret(), "mirrored");
    }

    #[tokio::test]
    async fn test_hydrate_adopts_unexpired_record_only() {
        let dir = tempfile::tempdir().unwrap();
        let record = Arc::new(FileTicketRecord::new(dir.path(), "wsfe"));

        record
            .save(&ticket("stale", chrono::Duration::seconds(-5)))
            .await
            .unwrap();
        let store = TicketStore::new(record.clone());
        assert!(store.hydrate().await.unwrap().is_none());
        assert!(store.current().is_none());

        record
            .save(&ticket("fresh", chrono::Duration::hours(1)))
            .await
            .unwrap();
        let hydrated = store.hydrate().await.unwrap().unwrap();
        assert_eq!(hydrated.token().expose_secret(), "fresh");
        assert_eq!(store.current().unwrap().token().expose_secret(), "fresh");
    }

    #[tokio::test]
    async fn test_reload_prefers_later_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let record = Arc::new(FileTicketRecord::new(dir.path(), "wsfe"));
        let store = TicketStore::new(record.clone());

        store
            .set(ticket("ours", chrono::Duration::minutes(30)))
            .await
            .unwrap();

        // Another process sharing the record writes a longer-lived ticket.
        record
            .save(&ticket("theirs", chrono::Duration::hours(12)))
            .await
            .unwrap();
        assert_eq!(
            store.reload().await.unwrap().token().expose_secret(),
            "theirs"
        );

        // An older record does not replace a newer in-memory ticket.
        record
            .save(&ticket("older", chrono::Duration::minutes(5)))
            .await
            .unwrap();
        assert_eq!(
            store.reload().await.unwrap().token().expose_secret(),
            "theirs"
        );
    }

    #[test]
    fn test_is_valid_predicate() {
        let t = ticket("t", chrono::Duration::minutes(10));
        assert!(TicketStore::is_valid(&t, Duration::from_secs(60)));
        assert!(!TicketStore::is_valid(&t, Duration::from_secs(3600)));
    }
}
