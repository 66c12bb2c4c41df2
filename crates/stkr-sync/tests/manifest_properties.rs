//! Property tests for the manifest decoder: arbitrary and truncated input
//! never panics, and encoded manifests decode back unchanged.

use proptest::prelude::*;
use stkr_core::{StickerManifest, StickerRef, StkrError};
use stkr_sync::{decode_manifest, encode_manifest};

fn arb_manifest() -> impl Strategy<Value = StickerManifest> {
    (
        "[a-zA-Z ]{0,20}",
        "[a-zA-Z]{0,12}",
        prop::collection::vec((0u32..128, "[a-z]{0,4}"), 0..10),
    )
        .prop_map(|(title, author, stickers)| {
            let stickers: Vec<StickerRef> = stickers
                .into_iter()
                .map(|(id, emoji)| StickerRef { id, emoji })
                .collect();
            StickerManifest {
                title,
                author,
                cover: stickers.first().cloned(),
                stickers,
                placeholder: false,
            }
        })
}

proptest! {
    #[test]
    fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
        match decode_manifest(&data) {
            Ok(_) | Err(StkrError::ManifestParse { .. }) => {}
            Err(other) => prop_assert!(false, "unexpected error kind: {other}"),
        }
    }

    #[test]
    fn encoded_manifest_decodes_unchanged(manifest in arb_manifest()) {
        let encoded = encode_manifest(&manifest).unwrap();
        prop_assert_eq!(decode_manifest(&encoded).unwrap(), manifest);
    }

    #[test]
    fn truncation_is_an_error_or_a_prefix(manifest in arb_manifest(), cut in any::<prop::sample::Index>()) {
        let encoded = encode_manifest(&manifest).unwrap();
        let cut = cut.index(encoded.len() + 1);
        match decode_manifest(&encoded[..cut]) {
            Ok(partial) => prop_assert!(partial.stickers.len() <= manifest.stickers.len()),
            Err(StkrError::ManifestParse { offset, .. }) => prop_assert!(offset <= cut),
            Err(other) => prop_assert!(false, "unexpected error kind: {other}"),
        }
    }
}
