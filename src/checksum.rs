//! 分片校验：解析 `Upload-Checksum` 头并增量计算摘要。

use base64::{Engine as _, engine::general_purpose};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

use crate::error::{UploadError, UploadResult};

/// `Tus-Checksum-Algorithm` 中声明的算法列表。
pub const SUPPORTED_ALGORITHMS: &str = "sha256,sha512";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Some(ChecksumAlgorithm::Sha256),
            "sha512" => Some(ChecksumAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn hasher(self) -> ChecksumHasher {
        match self {
            ChecksumAlgorithm::Sha256 => ChecksumHasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => ChecksumHasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => f.write_str("sha256"),
            ChecksumAlgorithm::Sha512 => f.write_str("sha512"),
        }
    }
}

/// 单个分片的期望摘要。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub digest: Vec<u8>,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, digest: Vec<u8>) -> Self {
        Self { algorithm, digest }
    }

    /// 解析 `<algorithm> <base64 digest>`。
    pub fn parse_header(value: &str) -> UploadResult<Self> {
        let mut parts = value.split_whitespace();
        let (Some(name), Some(encoded), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(UploadError::InvalidMetadata(
                "Upload-Checksum must be `<algorithm> <base64 digest>`".into(),
            ));
        };
        let algorithm = ChecksumAlgorithm::parse(name).ok_or_else(|| {
            UploadError::InvalidMetadata(format!("unsupported checksum algorithm {name:?}"))
        })?;
        let digest = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|err| UploadError::InvalidMetadata(format!("invalid checksum: {err}")))?;
        Ok(Self { algorithm, digest })
    }

    /// 与同算法的哈希结果比对。
    pub fn verify(&self, hasher: ChecksumHasher) -> UploadResult<()> {
        let actual = hasher.finalize();
        if actual == self.digest {
            return Ok(());
        }
        Err(UploadError::ChecksumMismatch {
            expected: format!(
                "{} {}",
                self.algorithm,
                general_purpose::STANDARD.encode(&self.digest)
            ),
            actual: format!(
                "{} {}",
                self.algorithm,
                general_purpose::STANDARD.encode(&actual)
            ),
        })
    }
}

/// 与 [`ChecksumAlgorithm`] 对应的增量哈希器。
pub enum ChecksumHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl ChecksumHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChecksumHasher::Sha256(hasher) => hasher.update(data),
            ChecksumHasher::Sha512(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            ChecksumHasher::Sha256(hasher) => hasher.finalize().to_vec(),
            ChecksumHasher::Sha512(hasher) => hasher.finalize().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha256_header(data: &[u8]) -> String {
        format!(
            "sha256 {}",
            general_purpose::STANDARD.encode(Sha256::digest(data))
        )
    }

    #[test]
    fn parses_and_verifies_sha256() {
        let checksum = Checksum::parse_header(&sha256_header(b"hello")).expect("parse");
        assert_eq!(checksum.algorithm, ChecksumAlgorithm::Sha256);

        let mut hasher = checksum.algorithm.hasher();
        hasher.update(b"hel");
        hasher.update(b"lo");
        checksum.verify(hasher).expect("checksum matches");
    }

    #[test]
    fn detects_mismatch() {
        let checksum = Checksum::parse_header(&sha256_header(b"hello")).expect("parse");
        let mut hasher = checksum.algorithm.hasher();
        hasher.update(b"world");
        assert!(matches!(
            checksum.verify(hasher),
            Err(UploadError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let result = Checksum::parse_header("md5 XrY7u+Ae7tCTyyK7j1rNww==");
        assert!(matches!(result, Err(UploadError::InvalidMetadata(_))));
        assert!(Checksum::parse_header("sha256").is_err());
    }
}
