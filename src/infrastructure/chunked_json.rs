// Chunked JSON streaming utilities
use crate::infrastructure::http_response::brotli_compress;
use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::Stream;
use serde::Serialize;

/// Create a chunked streaming response. Each item becomes one frame: a 4-byte
/// big-endian length followed by the (optionally Brotli-compressed) JSON.
pub fn chunked_json_stream<S, T>(stream: S, compress: bool) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let byte_stream = stream.then(move |item| {
        let json = serde_json::to_vec(&item);
        async move {
            match json {
                Ok(json) => frame(json, compress).await,
                Err(e) => Err(std::io::Error::from(e)),
            }
        }
    });

    // Chunks are compressed individually, so no Content-Encoding on the response
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(byte_stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Wrap serialized JSON in a length-prefixed frame
pub async fn frame(json: Vec<u8>, compress: bool) -> std::io::Result<Bytes> {
    let payload = if compress {
        brotli_compress(json).await?
    } else {
        json
    };

    let mut chunk = BytesMut::with_capacity(4 + payload.len());
    chunk.put_u32(payload.len() as u32);
    chunk.put_slice(&payload);

    Ok(chunk.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunk_is_length_prefixed() {
        let json = serde_json::to_vec(&vec![1, 2, 3]).unwrap();
        let chunk = frame(json, false).await.unwrap();

        let (len, body) = chunk.split_at(4);
        assert_eq!(u32::from_be_bytes(len.try_into().unwrap()) as usize, body.len());
        assert_eq!(body, b"[1,2,3]");
    }
}
