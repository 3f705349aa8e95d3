//! 包指纹：决定两个 Package 实例是否代表同一个包

use md5::{Digest, Md5};

/// 由 `管理器\源\ID[\版本]` 计算 64 位指纹（MD5 前 8 字节，小端）
pub fn fingerprint(manager: &str, source: &str, id: &str, version: Option<&str>) -> i64 {
    let mut key = format!("{}\\{}\\{}", manager, source, id);
    if let Some(version) = version {
        key.push('\\');
        key.push_str(version);
    }
    let digest = Md5::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(bytes)
}
