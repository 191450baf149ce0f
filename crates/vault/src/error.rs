use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Failed to read or write the vault key file: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("The vault key file is malformed")]
    MalformedKey,

    #[error("Stored ciphertext is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Stored ciphertext is truncated or was encrypted with a different key")]
    Ciphertext,

    #[error("Decrypted secret is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}
