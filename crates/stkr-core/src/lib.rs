pub mod config;
pub mod error;
pub mod types;

pub use error::{NetworkError, StkrError, StkrResult};
pub use types::{
    CachedPack, PackReference, StickerAsset, StickerFormat, StickerManifest, StickerRef,
};
