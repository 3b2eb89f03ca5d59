pub mod asset_path;
pub mod binary;
pub mod hash;
pub mod icon;
pub mod logging;
pub mod thread;
