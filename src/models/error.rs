use derive_more::{Display, From};

#[derive(Debug, Display, From)]
pub enum SError {
    #[display("I/O error: {_0}")]
    #[from]
    IOError(std::io::Error),
    #[display("zip error: {_0}")]
    #[from]
    ZipError(zip::result::ZipError),
    #[display("JSON error: {_0}")]
    #[from]
    JsonError(serde_json::Error),
    /// The file is not a managed assembly image.
    #[display("bad image format: {_0}")]
    BadImageFormat(String),
    #[display("malformed metadata: {_0}")]
    MalformedMetadata(String),
    #[display("invalid manifest: {_0}")]
    InvalidManifest(String),
    #[display("manifest not found in {_0}")]
    MissingManifest(String),
    #[display("mod '{_0}' is already registered")]
    DuplicateMod(String),
    #[display("invalid path '{_0}'")]
    InvalidPath(String),
    #[display("invalid version '{_0}'")]
    InvalidVersion(String),
    #[display("invalid state: {_0}")]
    InvalidState(String),
    #[display("cache format error: {_0}")]
    CacheFormat(String),
    #[display("type '{_0}' not found")]
    TypeNotFound(String),
    #[display("mod '{_0}' not found")]
    ModNotFound(String),
    #[display("host error: {_0}")]
    HostError(String),
    #[display("config error: {_0}")]
    ConfigError(String),
}

impl std::error::Error for SError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SError::IOError(e) => Some(e),
            SError::ZipError(e) => Some(e),
            SError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

/// Images dotscope cannot open at all are not managed assemblies; anything
/// it fails on past that point is broken metadata.
impl From<dotscope::Error> for SError {
    fn from(e: dotscope::Error) -> Self {
        match e {
            dotscope::Error::NotSupported | dotscope::Error::Goblin(_) => {
                SError::BadImageFormat(e.to_string())
            }
            _ => SError::MalformedMetadata(e.to_string()),
        }
    }
}

impl From<confy::ConfyError> for SError {
    fn from(e: confy::ConfyError) -> Self {
        SError::ConfigError(e.to_string())
    }
}
