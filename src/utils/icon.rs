use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Encodes icon bytes as a data URI string.
/// Returns None if the bytes are not a recognizable image.
pub fn icon_data_uri(icon_bytes: &[u8]) -> Option<String> {
    // Detect MIME type from the file signature
    let mime_type = if icon_bytes.starts_with(PNG_MAGIC) {
        "image/png"
    } else if icon_bytes.starts_with(JPEG_MAGIC) {
        "image/jpeg"
    } else {
        return None;
    };

    Some(format!("data:{};base64,{}", mime_type, BASE64.encode(icon_bytes)))
}
