use thiserror::Error;

// === SyncError ===

/// Errors surfaced by the synchronization core to its callers.
///
/// None of these are fatal: every variant is recoverable by a user retry or by
/// the next reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// No authenticated session; the caller must redirect to login.
    #[error("Not signed in")]
    AuthAbsent,
    /// A read or write against the remote store failed.
    #[error("Remote store unavailable: {0}")]
    TransientIo(String),
    /// The input was rejected before reaching the remote store.
    #[error("Invalid bookmark: {0}")]
    Validation(#[from] ValidationError),
    /// The edit or delete target no longer exists in the latest snapshot.
    #[error("Bookmark no longer exists: {0}")]
    StaleReference(String),
    /// Another bookmark is already being edited.
    #[error("Another bookmark is being edited: {0}")]
    EditInProgress(String),
    /// The bookmark is not in an editable state.
    #[error("Bookmark is not being edited: {0}")]
    NotEditing(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SyncError::StaleReference(id),
            other => SyncError::TransientIo(other.to_string()),
        }
    }
}

// === ValidationError ===

/// Errors produced while validating user-entered bookmark fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The title is empty after trimming.
    #[error("title must not be empty")]
    EmptyTitle,
    /// The URL is empty after trimming.
    #[error("url must not be empty")]
    EmptyUrl,
    /// The URL names a scheme other than http or https.
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    /// The URL could not be parsed as an absolute URL with a host.
    #[error("malformed url: {0}")]
    MalformedUrl(String),
}

// === StoreError ===

/// Errors returned by remote store collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Local database operation failed.
    #[error("Store database error: {0}")]
    Database(String),
    /// The request could not reach the remote store.
    #[error("Store network error: {0}")]
    Network(String),
    /// The response body could not be decoded.
    #[error("Store decode error: {0}")]
    Decode(String),
    /// No bookmark with the given id is visible to the owner.
    #[error("Bookmark not found: {0}")]
    NotFound(String),
    /// The remote store rejected the credentials.
    #[error("Store rejected credentials")]
    Unauthorized,
}

// === AuthError ===

/// Errors related to session resolution and sign-out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The auth backend could not be reached.
    #[error("Auth network error: {0}")]
    Network(String),
    /// The auth backend failed while answering.
    #[error("Auth backend error: {0}")]
    Backend(String),
    /// The presented credentials were rejected.
    #[error("Auth credentials rejected")]
    Unauthorized,
}

// === PushError ===

/// Errors related to push-channel management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The push backend refused or failed the subscription.
    #[error("Push subscribe failed: {0}")]
    SubscribeFailed(String),
    /// The channel id is not known to the push backend.
    #[error("Push channel not found: {0}")]
    ChannelNotFound(String),
}

// === PayloadError ===

/// Errors produced when a push payload does not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// The payload is not a JSON object.
    #[error("Payload is not an object")]
    NotAnObject,
    /// The event type is missing or not one of INSERT, UPDATE, DELETE.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
    /// Neither the new nor the old row carries an id.
    #[error("Payload has no affected id")]
    MissingId,
}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing settings.
    #[error("Settings I/O error: {0}")]
    IoError(String),
    /// Failed to serialize or deserialize settings.
    #[error("Settings serialization error: {0}")]
    SerializationError(String),
    /// The provided settings key is invalid.
    #[error("Invalid settings key: {0}")]
    InvalidKey(String),
    /// The provided settings value is invalid.
    #[error("Invalid settings value: {0}")]
    InvalidValue(String),
}

// === AppError ===

/// Errors raised while wiring the application together.
#[derive(Debug, Error)]
pub enum AppError {
    /// Startup found no authenticated identity.
    #[error("No authenticated session; sign in first")]
    AuthAbsent,
    /// The local database could not be opened.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// The push channel could not be opened.
    #[error(transparent)]
    Push(#[from] PushError),
    /// Settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The configured backend is incomplete.
    #[error("Invalid configuration: {0}")]
    Config(String),
}
