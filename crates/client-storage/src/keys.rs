//! Storage key constants.

/// Storage keys used by the client
pub struct StorageKeys;

impl StorageKeys {
    /// Access token attached to authorized requests
    pub const ACCESS_TOKEN: &'static str = "accessToken";

    /// Refresh token used to mint a new credential pair
    pub const REFRESH_TOKEN: &'static str = "refreshToken";

    /// Identifier of the signed-in user (string-encoded)
    pub const USER_ID: &'static str = "userId";

    /// Name of the mirrored authorization cookie
    pub const AUTH_COOKIE: &'static str = "Authorization";

    /// Every key that belongs to the credential pair.
    pub const CREDENTIAL_KEYS: [&'static str; 3] =
        [Self::ACCESS_TOKEN, Self::REFRESH_TOKEN, Self::USER_ID];
}
