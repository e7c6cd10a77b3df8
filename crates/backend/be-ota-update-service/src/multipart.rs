//! Single-part `multipart/mixed` framing for manifest responses

/// Fixed boundary; payloads are JSON and never contain it.
pub const MULTIPART_BOUNDARY: &str = "----boundary";

pub const PART_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// `content-type` header value of a framed response.
pub fn content_type() -> String {
    format!("multipart/mixed; boundary={}", MULTIPART_BOUNDARY)
}

/// Frame `json` as the only part of a multipart body, under form-data `name`.
pub fn encode_single_part(name: &str, json: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(json.len() + 192);
    body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(format!("content-type: {}\r\n", PART_CONTENT_TYPE).as_bytes());
    body.extend_from_slice(
        format!("content-disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
    );
    body.extend_from_slice(json);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}
