//! 缓存键派生
//!
//! 两种策略：
//! - `content_hash`：对 URL 与全部参数值做摘要，键不可读但几乎不会碰撞；
//! - `filename`：取 URL 最后一段路径作为可读文件名，带查询串时追加数字后缀。

use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 摘要截取的字节数（128 bit）
const DIGEST_BYTES: usize = 16;
/// 查询串后缀取模
const QUERY_SUFFIX_MODULUS: u32 = 10_000;
/// 文件名策略的最终兜底
const FALLBACK_NAME: &str = "default";
/// 可读部分的最大字节数，超出时截断并追加完整名字的摘要
pub const MAX_NAME_LEN: usize = 150;

/// 缓存键派生策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// 摘要键：hex(sha256(url + "_" + values)[..16])
    #[default]
    ContentHash,
    /// 可读键：文件名 + 可选的查询串数字后缀
    Filename,
}

impl KeyPolicy {
    /// 由源 URL 与有序参数派生缓存键。任何输入都不会失败。
    pub fn derive(&self, url: &str, params: &[(&str, String)]) -> String {
        match self {
            KeyPolicy::ContentHash => content_hash_key(url, params),
            KeyPolicy::Filename => filename_key(url),
        }
    }
}

fn content_hash_key(url: &str, params: &[(&str, String)]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    // 无参数时只对 URL 取摘要，与历史缓存文件保持一致
    if !params.is_empty() {
        let joined = params
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join("_");
        hasher.update(b"_");
        hasher.update(joined.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..DIGEST_BYTES])
}

/// URL 中与文件名策略相关的三个部分
struct UrlParts {
    path: String,
    host: String,
    query: Option<String>,
}

fn split_url(url: &str) -> UrlParts {
    if let Ok(parsed) = Url::parse(url) {
        return UrlParts {
            path: parsed.path().to_string(),
            host: parsed.host_str().unwrap_or_default().to_string(),
            query: parsed.query().map(str::to_string),
        };
    }

    // 解析失败时按字面切分：丢弃 fragment，`?` 之后为查询串，没有 host
    let without_fragment = url.split('#').next().unwrap_or_default();
    let (path, query) = match without_fragment.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (without_fragment, None),
    };
    UrlParts {
        path: path.to_string(),
        host: String::new(),
        query,
    }
}

fn filename_key(url: &str) -> String {
    let parts = split_url(url);

    let basename = parts.path.rsplit('/').next().unwrap_or_default();
    let mut name = sanitize(basename);
    if name.is_empty() {
        name = sanitize(&parts.host.replace('.', "_"));
    }
    if name.is_empty() {
        name = FALLBACK_NAME.to_string();
    }
    if name.len() > MAX_NAME_LEN {
        // sanitize 之后只剩 ASCII，按字节截断不会切开字符
        let digest = fnv1a32(name.as_bytes());
        name.truncate(MAX_NAME_LEN);
        name.push_str(&format!("_{digest:08x}"));
    }

    if let Some(query) = parts.query.as_deref().filter(|q| !q.is_empty()) {
        let suffix = fnv1a32(query.as_bytes()) % QUERY_SUFFIX_MODULUS;
        name.push('_');
        name.push_str(&suffix.to_string());
    }
    name
}

/// 仅保留 ASCII 字母数字与 `_-.`
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect()
}

/// 32 位 FNV-1a，跨进程/跨平台稳定
fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(values: &[(&'static str, &str)]) -> Vec<(&'static str, String)> {
        values.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    fn is_safe(key: &str) -> bool {
        !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    }

    #[test]
    fn content_hash_is_deterministic_and_128_bit() {
        let p = params(&[("model", "rmbg-1.4"), ("alpha_matting", "false")]);
        let a = KeyPolicy::ContentHash.derive("https://example.com/a.jpg", &p);
        let b = KeyPolicy::ContentHash.derive("https://example.com/a.jpg", &p);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn content_hash_changes_with_any_param() {
        let url = "https://example.com/a.jpg";
        let base = params(&[("alpha_matting", "true"), ("erode_size", "10")]);
        let changed = params(&[("alpha_matting", "true"), ("erode_size", "11")]);
        assert_ne!(
            KeyPolicy::ContentHash.derive(url, &base),
            KeyPolicy::ContentHash.derive(url, &changed)
        );
        assert_ne!(
            KeyPolicy::ContentHash.derive(url, &base),
            KeyPolicy::ContentHash.derive("https://example.com/b.jpg", &base)
        );
    }

    #[test]
    fn content_hash_without_params_covers_url_only() {
        let url = "https://example.com/a.jpg";
        let digest = Sha256::digest(url.as_bytes());
        assert_eq!(
            KeyPolicy::ContentHash.derive(url, &[]),
            hex::encode(&digest[..16])
        );
    }

    #[test]
    fn filename_uses_basename_and_ignores_params() {
        let key = KeyPolicy::Filename.derive(
            "https://cdn.example.com/photos/cat.jpg",
            &params(&[("model", "x")]),
        );
        assert_eq!(key, "cat.jpg");
    }

    #[test]
    fn filename_strips_unsafe_chars() {
        let key = KeyPolicy::Filename.derive("https://example.com/photos/my pic!(1).jpg", &[]);
        assert!(is_safe(&key), "unsafe key: {key}");
        assert!(key.starts_with("my"));
        assert!(key.ends_with("1.jpg"));
    }

    #[test]
    fn filename_fragment_is_not_part_of_the_name() {
        let key = KeyPolicy::Filename.derive("https://example.com/photos/pic#1.jpg?w=10", &[]);
        assert!(is_safe(&key));
        assert!(!key.contains('#'));
        assert!(key.starts_with("pic"));
    }

    #[test]
    fn filename_query_suffix_is_stable_and_query_sensitive() {
        let a = KeyPolicy::Filename.derive("https://example.com/p/cat.jpg?w=10", &[]);
        let again = KeyPolicy::Filename.derive("https://example.com/p/cat.jpg?w=10", &[]);
        let b = KeyPolicy::Filename.derive("https://example.com/p/cat.jpg?w=20", &[]);
        assert_eq!(a, again);
        assert_eq!(a, format!("cat.jpg_{}", fnv1a32(b"w=10") % 10_000));
        assert_eq!(b, format!("cat.jpg_{}", fnv1a32(b"w=20") % 10_000));
    }

    #[test]
    fn filename_falls_back_to_host_then_default() {
        assert_eq!(
            KeyPolicy::Filename.derive("https://img.example.com/", &[]),
            "img_example_com"
        );
        assert_eq!(KeyPolicy::Filename.derive("file:///", &[]), "default");
    }

    #[test]
    fn filename_never_fails_on_unparseable_input() {
        let key = KeyPolicy::Filename.derive("not a url/at all?x=1", &[]);
        assert!(key.starts_with("atall_"), "got {key}");
        assert!(is_safe(&key));
        assert_eq!(KeyPolicy::Filename.derive("%%%", &[]), "default");
        assert_eq!(KeyPolicy::Filename.derive("", &[]), "default");
    }

    #[test]
    fn filename_long_basename_is_capped_but_distinct() {
        let long_a = format!("https://cdn.example.com/{}a.jpg", "x".repeat(300));
        let long_b = format!("https://cdn.example.com/{}b.jpg", "x".repeat(300));
        let a = KeyPolicy::Filename.derive(&long_a, &[]);
        let b = KeyPolicy::Filename.derive(&long_b, &[]);

        assert!(a.len() <= MAX_NAME_LEN + 9, "{} bytes", a.len());
        assert!(is_safe(&a));
        assert!(a.starts_with(&"x".repeat(MAX_NAME_LEN)));
        assert_ne!(a, b);
        assert_eq!(a, KeyPolicy::Filename.derive(&long_a, &[]));

        let with_query = KeyPolicy::Filename.derive(&format!("{long_a}?v=2"), &[]);
        assert!(with_query.len() <= MAX_NAME_LEN + 14);
    }

    #[test]
    fn fnv1a32_matches_reference_vectors() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn policy_deserializes_from_snake_case() {
        let p: KeyPolicy = serde_json::from_str("\"filename\"").expect("parse policy");
        assert_eq!(p, KeyPolicy::Filename);
        let p: KeyPolicy = serde_json::from_str("\"content_hash\"").expect("parse policy");
        assert_eq!(p, KeyPolicy::ContentHash);
    }
}
