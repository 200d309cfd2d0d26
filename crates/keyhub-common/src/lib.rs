pub mod channel;
pub mod config;
pub mod error;
pub mod mask;

pub use channel::{ChannelType, RelayFormat};
pub use config::{
    EncryptionKey, GlobalConfig, GlobalConfigError, GlobalConfigPatch, GroupConfig,
    GroupPreconditions, HeaderRule, ProxyHop,
};
pub use error::ErrorKind;
pub use mask::mask_key;
