//! Well-known agent config keys and HTTP field names

/// Default name of the game port in the agent config
pub const DEFAULT_PORT_KEY: &str = "game";

/// Default alias under which the game certificate thumbprint is published
pub const DEFAULT_CERT_ALIAS: &str = "gameCert";

/// Session cookie supplied by the allocation call
pub const SESSION_COOKIE: &str = "sessionCookie";

/// Session (match) identifier supplied by the allocation call
pub const SESSION_ID: &str = "sessionId";

/// Folder the agent collects logs from
pub const LOG_FOLDER: &str = "logFolder";

/// Folder installed certificates are written to
pub const CERTIFICATE_FOLDER: &str = "certificateFolder";

/// Identifier of this server instance
pub const SESSION_HOST_ID: &str = "sessionHostId";

/// Request/response header carrying the player token
pub const TOKEN_HEADER: &str = "token";

/// Fields synthesized into every config snapshot
pub mod fields {
    pub const IS_ACTIVATED: &str = "isActivated";
    pub const ASSET_FILE_TEXT: &str = "assetFileText";
    pub const LOGS_DIRECTORY: &str = "logsDirectory";
    pub const INSTALLED_CERT_THUMBPRINT: &str = "installedCertThumbprint";
    pub const INITIAL_PLAYERS: &str = "InitialPlayers";
    pub const CONNECTED_PLAYERS: &str = "ConnectedPlayers";
    pub const NEXT_MAINTENANCE: &str = "nextMaintenance";
}
