use chrono::Local;
use lazy_static::lazy_static;
use md5::{Digest, Md5};
use regex::Regex;
use url::Url;

// 文件名长度上限（Windows下最保守）
const MAX_NAME_LEN: usize = 200;
const MAX_STEM_LEN: usize = 190;

/// 从URL提取文件名
///
/// 路径末段是已知媒体扩展名时直接采用（经过清理），
/// 否则用时间戳加URL哈希合成一个不会冲突的名字。
pub fn extract_filename(url: &str) -> String {
    lazy_static! {
        static ref MEDIA_NAME: Regex =
            Regex::new(r"(?i)/([^/]+\.(?:mp4|m4v|m3u8|ts))$").expect("媒体文件名模式编译失败");
    }

    if let Ok(parsed) = Url::parse(url) {
        let path = urlencoding::decode(parsed.path())
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| parsed.path().to_string());
        if let Some(caps) = MEDIA_NAME.captures(&path) {
            return sanitize_filename(&caps[1]);
        }
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let digest = format!("{:x}", Md5::digest(url.as_bytes()));
    format!("video_{}_{}.mp4", timestamp, &digest[..8])
}

/// 清理文件名中的非法字符并限制长度，保留扩展名
///
/// 幂等：对已清理的名字再清理一次结果不变。
pub fn sanitize_filename(filename: &str) -> String {
    lazy_static! {
        static ref ILLEGAL_CHARS: Regex =
            Regex::new(r#"[<>:"/\\|?*]"#).expect("非法字符模式编译失败");
    }

    let cleaned = ILLEGAL_CHARS.replace_all(filename, "_").into_owned();
    if cleaned.chars().count() <= MAX_NAME_LEN {
        return cleaned;
    }

    match cleaned.rsplit_once('.') {
        Some((stem, ext)) => {
            let stem: String = stem.chars().take(MAX_STEM_LEN).collect();
            format!("{}.{}", stem, ext)
        }
        None => cleaned.chars().take(MAX_NAME_LEN).collect(),
    }
}
