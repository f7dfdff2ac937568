//! 读取已持久化的上传内容，支持单段 Range。

use crate::backend::{ByteStream, StoreError};
use crate::error::{UploadError, UploadResult};
use crate::info::UploadInfo;
use crate::store::UploadStore;

/// [`UploadStore::serve`] 的结果。
pub enum Served {
    Full {
        info: UploadInfo,
        body: ByteStream,
    },
    /// 已存字节中的 `start..=end`。
    Partial {
        info: UploadInfo,
        start: u64,
        end: u64,
        body: ByteStream,
    },
    Unsatisfiable {
        info: UploadInfo,
    },
}

impl Served {
    pub fn info(&self) -> &UploadInfo {
        match self {
            Served::Full { info, .. }
            | Served::Partial { info, .. }
            | Served::Unsatisfiable { info } => info,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RangeRequest {
    Full,
    Bytes(u64, u64),
    Unsatisfiable,
}

impl UploadStore {
    /// 流式读取已持久化的全部字节 `[0, offset)`。
    pub async fn read(&self, id: &str) -> UploadResult<ByteStream> {
        let info = self.get_info(id).await?;
        self.stream_range(&info, 0, info.offset).await
    }

    /// 按 Range 头读取；格式错误或多段 Range 时返回完整内容。
    pub async fn serve(&self, id: &str, range: Option<&str>) -> UploadResult<Served> {
        let info = self.get_info(id).await?;
        let request = range.map_or(RangeRequest::Full, |value| parse_range(value, info.offset));
        match request {
            RangeRequest::Full => {
                let body = self.stream_range(&info, 0, info.offset).await?;
                Ok(Served::Full { info, body })
            }
            RangeRequest::Bytes(start, end) => {
                let body = self.stream_range(&info, start, end + 1).await?;
                Ok(Served::Partial {
                    info,
                    start,
                    end,
                    body,
                })
            }
            RangeRequest::Unsatisfiable => Ok(Served::Unsatisfiable { info }),
        }
    }

    async fn stream_range(&self, info: &UploadInfo, start: u64, end: u64) -> UploadResult<ByteStream> {
        self.content
            .read_range(&info.id, start, end)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(id) => UploadError::NotFound(id),
                other => UploadError::Storage(other),
            })
    }
}

/// 按可读字节数 `size` 解析 `Range` 头。
fn parse_range(value: &str, size: u64) -> RangeRequest {
    let Some(range) = value.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    if range.contains(',') {
        return RangeRequest::Full;
    }
    let Some((start_part, end_part)) = range.split_once('-') else {
        return RangeRequest::Full;
    };
    let (start_part, end_part) = (start_part.trim(), end_part.trim());

    if start_part.is_empty() {
        let Ok(suffix) = end_part.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if suffix == 0 || size == 0 {
            return RangeRequest::Unsatisfiable;
        }
        return RangeRequest::Bytes(size.saturating_sub(suffix), size - 1);
    }

    let Ok(start) = start_part.parse::<u64>() else {
        return RangeRequest::Full;
    };
    let end = if end_part.is_empty() {
        u64::MAX
    } else {
        match end_part.parse::<u64>() {
            Ok(end) if end >= start => end,
            _ => return RangeRequest::Full,
        }
    };
    if start >= size {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Bytes(start, end.min(size - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::NewUpload;
    use crate::store::tests::memory_store;
    use bytes::Bytes;
    use futures_util::{StreamExt, stream};

    async fn collect(body: ByteStream) -> Vec<u8> {
        let chunks: Vec<_> = body.collect().await;
        chunks
            .into_iter()
            .flat_map(|chunk| chunk.expect("chunk").to_vec())
            .collect()
    }

    #[test]
    fn parses_single_ranges() {
        assert_eq!(parse_range("bytes=0-3", 10), RangeRequest::Bytes(0, 3));
        assert_eq!(parse_range("bytes=4-", 10), RangeRequest::Bytes(4, 9));
        assert_eq!(parse_range("bytes=-3", 10), RangeRequest::Bytes(7, 9));
        assert_eq!(parse_range("bytes=-30", 10), RangeRequest::Bytes(0, 9));
        assert_eq!(parse_range("bytes=5-100", 10), RangeRequest::Bytes(5, 9));
    }

    #[test]
    fn unusable_ranges() {
        assert_eq!(parse_range("bytes=10-", 10), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-", 0), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 10), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range("items=0-3", 10), RangeRequest::Full);
        assert_eq!(parse_range("bytes=0-1,4-5", 10), RangeRequest::Full);
        assert_eq!(parse_range("bytes=5-2", 10), RangeRequest::Full);
        assert_eq!(parse_range("bytes=a-b", 10), RangeRequest::Full);
    }

    #[tokio::test]
    async fn partial_upload_is_readable_mid_transfer() {
        let store = memory_store();
        let info = store.create(NewUpload::sized(10)).await.expect("create");
        let lock = store.lock(&info.id).await.expect("lock");
        store
            .write_chunk(
                &lock,
                0,
                stream::iter(vec![Ok(Bytes::from_static(b"hello"))]),
                None,
            )
            .await
            .expect("write");

        assert_eq!(collect(store.read(&info.id).await.expect("read")).await, b"hello");

        match store.serve(&info.id, Some("bytes=1-")).await.expect("serve") {
            Served::Partial {
                start, end, body, ..
            } => {
                assert_eq!((start, end), (1, 4));
                assert_eq!(collect(body).await, b"ello");
            }
            _ => panic!("expected partial content"),
        }
        assert!(matches!(
            store.serve(&info.id, Some("bytes=5-")).await.expect("serve"),
            Served::Unsatisfiable { .. }
        ));
    }

    #[tokio::test]
    async fn serve_without_range_returns_everything() {
        let store = memory_store();
        let info = store.create(NewUpload::sized(3)).await.expect("create");
        let lock = store.lock(&info.id).await.expect("lock");
        store
            .write_chunk(&lock, 0, stream::iter(vec![Ok(Bytes::from_static(b"abc"))]), None)
            .await
            .expect("write");

        let served = store.serve(&info.id, None).await.expect("serve");
        assert_eq!(served.info().offset, 3);
        match served {
            Served::Full { body, .. } => assert_eq!(collect(body).await, b"abc"),
            _ => panic!("expected full content"),
        }
    }

    #[tokio::test]
    async fn stale_bytes_past_offset_are_not_served() {
        let store = memory_store();
        let info = store.create(NewUpload::sized(6)).await.expect("create");
        let lock = store.lock(&info.id).await.expect("lock");
        store
            .write_chunk(&lock, 0, stream::iter(vec![Ok(Bytes::from_static(b"abc"))]), None)
            .await
            .expect("write");

        let mut sink = store.content.open_writer(&info.id, 3).await.expect("open");
        sink.write(Bytes::from_static(b"zz")).await.expect("write");
        sink.commit().await.expect("commit");

        assert_eq!(collect(store.read(&info.id).await.expect("read")).await, b"abc");
    }

    #[tokio::test]
    async fn unknown_upload_is_not_found() {
        let store = memory_store();
        assert!(matches!(
            store.serve("missing", None).await,
            Err(UploadError::NotFound(_))
        ));
    }
}
