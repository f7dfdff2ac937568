//! 上传记录模型、生命周期状态与 Upload-Metadata 编解码。

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{UploadError, UploadResult};

/// 单个上传的持久化记录。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub size_is_deferred: bool,
    pub offset: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub is_partial: bool,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_ids: Vec<String>,
    pub create_time: DateTime<Utc>,
    /// 最近一次成功修改的时间；无修改时等于 `create_time`。
    pub update_time: DateTime<Utc>,
}

/// 由 [`UploadInfo`] 推导的生命周期状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    /// 长度未定，可写入，仅受最大上传大小限制。
    Deferred,
    SizedInProgress,
    Complete,
    /// 由合并产生，不接受分片写入。
    ConcatenatedFinal,
    /// 记录与内容均已删除。
    Terminated,
}

impl UploadInfo {
    pub fn state(&self) -> UploadState {
        if self.is_final && !self.partial_ids.is_empty() {
            return UploadState::ConcatenatedFinal;
        }
        match self.size {
            None => UploadState::Deferred,
            Some(size) if self.offset >= size => UploadState::Complete,
            Some(_) => UploadState::SizedInProgress,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.size == Some(self.offset)
    }

    /// 达到声明大小前还能接受的字节数。
    pub fn remaining(&self) -> Option<u64> {
        self.size.map(|size| size.saturating_sub(self.offset))
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.update_time.max(self.create_time)
    }
}

/// 新上传声明的长度。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadLength {
    Known(u64),
    Deferred,
}

/// 新上传在合并中的角色。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ConcatKind {
    #[default]
    None,
    Partial,
    Final(Vec<String>),
}

/// 创建上传的请求参数。
#[derive(Clone, Debug, Default)]
pub struct NewUpload {
    pub length: Option<UploadLength>,
    pub metadata: BTreeMap<String, String>,
    pub concat: ConcatKind,
}

impl NewUpload {
    pub fn sized(size: u64) -> Self {
        Self {
            length: Some(UploadLength::Known(size)),
            ..Self::default()
        }
    }

    pub fn deferred() -> Self {
        Self {
            length: Some(UploadLength::Deferred),
            ..Self::default()
        }
    }

    pub fn final_of(partial_ids: Vec<String>) -> Self {
        Self {
            length: None,
            concat: ConcatKind::Final(partial_ids),
            ..Self::default()
        }
    }

    pub fn partial(mut self) -> Self {
        self.concat = ConcatKind::Partial;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// 校验创建请求并生成 offset 为 0 的新记录。
    pub(crate) fn into_info(self) -> UploadResult<UploadInfo> {
        for key in self.metadata.keys() {
            validate_metadata_key(key)?;
        }

        let (size, size_is_deferred, is_partial, is_final, partial_ids) =
            match (self.concat, self.length) {
                (ConcatKind::Final(ids), None) => {
                    if ids.is_empty() {
                        return Err(UploadError::InvalidMetadata(
                            "final upload must reference at least one partial upload".into(),
                        ));
                    }
                    if ids.iter().any(|id| !is_valid_id(id)) {
                        return Err(UploadError::InvalidMetadata(
                            "final upload references a malformed upload id".into(),
                        ));
                    }
                    (None, false, false, true, ids)
                }
                (ConcatKind::Final(_), Some(_)) => {
                    return Err(UploadError::InvalidMetadata(
                        "final upload must not declare a length".into(),
                    ));
                }
                (_, None) => {
                    return Err(UploadError::InvalidMetadata(
                        "upload length or deferral is required".into(),
                    ));
                }
                (concat, Some(length)) => {
                    let is_partial = concat == ConcatKind::Partial;
                    match length {
                        UploadLength::Known(size) => {
                            (Some(size), false, is_partial, false, Vec::new())
                        }
                        UploadLength::Deferred => (None, true, is_partial, false, Vec::new()),
                    }
                }
            };

        let now = Utc::now();
        Ok(UploadInfo {
            id: new_upload_id(),
            size,
            size_is_deferred,
            offset: 0,
            metadata: self.metadata,
            is_partial,
            is_final,
            partial_ids,
            create_time: now,
            update_time: now,
        })
    }
}

pub fn new_upload_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 上传 ID 同时作为存储键，只接受安全字符。
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_metadata_key(key: &str) -> UploadResult<()> {
    if key.is_empty() {
        return Err(UploadError::InvalidMetadata("empty metadata key".into()));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii() && !c.is_ascii_whitespace() && !c.is_ascii_control() && c != ',')
    {
        return Err(UploadError::InvalidMetadata(format!(
            "metadata key {key:?} contains forbidden characters"
        )));
    }
    Ok(())
}

/// 解析 `Upload-Metadata` 头：`key base64,key2,...`。
pub fn parse_metadata_header(value: &str) -> UploadResult<BTreeMap<String, String>> {
    let mut metadata = BTreeMap::new();
    for element in value.split(',') {
        let element = element.trim();
        if element.is_empty() {
            continue;
        }
        let mut parts = element.split(' ').filter(|part| !part.is_empty());
        let key = parts.next().unwrap_or_default();
        validate_metadata_key(key)?;
        let decoded = match parts.next() {
            Some(encoded) => {
                let bytes = general_purpose::STANDARD.decode(encoded).map_err(|err| {
                    UploadError::InvalidMetadata(format!("value of {key:?} is not base64: {err}"))
                })?;
                String::from_utf8(bytes).map_err(|_| {
                    UploadError::InvalidMetadata(format!("value of {key:?} is not utf-8"))
                })?
            }
            None => String::new(),
        };
        if parts.next().is_some() {
            return Err(UploadError::InvalidMetadata(format!(
                "metadata element {element:?} has too many parts"
            )));
        }
        metadata.insert(key.to_string(), decoded);
    }
    Ok(metadata)
}

/// 将元数据编码为 `Upload-Metadata` 头。
pub fn render_metadata_header(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{key} {}", general_purpose::STANDARD.encode(value))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metadata_with_empty_values() {
        let parsed =
            parse_metadata_header("filename d29ybGRfZG9taW5hdGlvbl9wbGFuLnBkZg==,is_confidential")
                .expect("parse");
        assert_eq!(parsed["filename"], "world_domination_plan.pdf");
        assert_eq!(parsed["is_confidential"], "");
    }

    #[test]
    fn rejects_invalid_base64_value() {
        let result = parse_metadata_header("filename !!!");
        assert!(matches!(result, Err(UploadError::InvalidMetadata(_))));
    }

    #[test]
    fn render_is_parseable() {
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), "report.txt".to_string());
        metadata.insert("flag".to_string(), String::new());
        let header = render_metadata_header(&metadata);
        assert_eq!(header, "filename cmVwb3J0LnR4dA==,flag");
        assert_eq!(parse_metadata_header(&header).expect("parse"), metadata);
    }

    #[test]
    fn new_upload_requires_length() {
        let result = NewUpload::default().into_info();
        assert!(matches!(result, Err(UploadError::InvalidMetadata(_))));
    }

    #[test]
    fn final_upload_rejects_declared_length() {
        let mut request = NewUpload::final_of(vec!["a".into()]);
        request.length = Some(UploadLength::Known(3));
        assert!(matches!(
            request.into_info(),
            Err(UploadError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn rejects_metadata_key_with_space() {
        let mut metadata = BTreeMap::new();
        metadata.insert("bad key".to_string(), "v".to_string());
        let result = NewUpload::sized(1).with_metadata(metadata).into_info();
        assert!(matches!(result, Err(UploadError::InvalidMetadata(_))));
    }

    #[test]
    fn state_follows_record_fields() {
        let mut info = NewUpload::sized(10).into_info().expect("info");
        assert_eq!(info.state(), UploadState::SizedInProgress);
        info.offset = 10;
        assert_eq!(info.state(), UploadState::Complete);

        let deferred = NewUpload::deferred().partial().into_info().expect("info");
        assert_eq!(deferred.state(), UploadState::Deferred);
        assert!(deferred.is_partial);

        let final_upload = NewUpload::final_of(vec!["a".into(), "b".into()])
            .into_info()
            .expect("info");
        assert_eq!(final_upload.state(), UploadState::ConcatenatedFinal);
        assert!(final_upload.is_final);
    }

    #[test]
    fn generated_ids_are_valid_keys() {
        let id = new_upload_id();
        assert!(is_valid_id(&id));
        assert!(!is_valid_id("../etc/passwd"));
        assert!(!is_valid_id(""));
    }
}
