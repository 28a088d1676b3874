use lazy_static::lazy_static;
use regex::{Regex, RegexSet};
use url::Url;

/// URL分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_match: bool,
    pub cover_url: Option<String>,
}

// 目标站点域名列表
const TARGET_DOMAINS: [&str; 6] = [
    "channels.weixin.qq.com",
    "finder.video.qq.com",
    "findermp.video.qq.com",
    "wxsnsdy.tc.qq.com",
    "wxsnsdythumb.tc.qq.com",
    "v.qq.com",
];

// 缩略图/封面/头像特征，命中则排除
const EXCLUDE_MARKERS: [&str; 3] = ["thumb", "cover", "avatar"];

lazy_static! {
    static ref VIDEO_PATTERNS: RegexSet = RegexSet::new([
        r"(?i)\.mp4(\?.*)?$",
        r"(?i)\.m4v(\?.*)?$",
        r"(?i)\.m3u8(\?.*)?$",
        r"(?i)/findersnsvideo/",
        r"(?i)/findermp/",
        r"(?i)video_id=",
        r"(?i)media_id=",
    ])
    .expect("视频URL模式编译失败");
}

/// 判断主机名是否属于目标站点
pub fn is_target_host(host: &str) -> bool {
    TARGET_DOMAINS.iter().any(|d| host.contains(d))
}

/// 判断是否是目标视频URL
///
/// 完全函数：任何输入都只返回 true/false，不会失败。
pub fn is_video_url(url: &str) -> bool {
    let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) {
        Some(h) => h,
        None => return false,
    };

    if !is_target_host(&host) {
        return false;
    }
    if !VIDEO_PATTERNS.is_match(url) {
        return false;
    }

    // 排除缩略图、封面、头像
    let lower = url.to_lowercase();
    !EXCLUDE_MARKERS.iter().any(|m| lower.contains(m))
}

/// 对请求URL做一次完整分类
pub fn classify(url: &str) -> Classification {
    if is_video_url(url) {
        Classification {
            is_match: true,
            cover_url: extract_cover_url(url),
        }
    } else {
        Classification {
            is_match: false,
            cover_url: None,
        }
    }
}

/// 尝试从视频URL推断封面URL
///
/// 按固定优先级做结构替换，返回第一个真正改变了URL的结果。
/// 推断出的URL可能404，调用方需要容忍。
pub fn extract_cover_url(video_url: &str) -> Option<String> {
    lazy_static! {
        static ref MP4_EXT: Regex = Regex::new(r"(?i)\.mp4(\?|$)").expect("封面URL模式编译失败");
    }

    let candidates: [Box<dyn Fn(&str) -> String>; 4] = [
        Box::new(|u: &str| u.replace("/findersnsvideo/", "/findersnscover/")),
        Box::new(|u: &str| u.replace("/video/", "/cover/")),
        Box::new(|u: &str| MP4_EXT.replace(u, "_thumb.jpg$1").into_owned()),
        Box::new(|u: &str| MP4_EXT.replace(u, ".jpg$1").into_owned()),
    ];

    for rule in candidates.iter() {
        let cover = rule(video_url);
        if cover != video_url {
            return Some(cover);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_target_domain_never_matches() {
        assert!(!is_video_url("https://example.com/some/video.mp4"));
        assert!(!is_video_url("https://www.bilibili.com/video_id=123.mp4"));
        assert!(!is_video_url("not a url at all"));
    }

    #[test]
    fn test_target_domain_with_media_pattern_matches() {
        assert!(is_video_url(
            "https://finder.video.qq.com/findersnsvideo/251021/abc.mp4"
        ));
        assert!(is_video_url(
            "https://channels.weixin.qq.com/web/pages/feed?video_id=123.mp4"
        ));
        assert!(is_video_url("https://findermp.video.qq.com/251021/x.m3u8?sign=1"));
    }

    #[test]
    fn test_thumb_exclusion_takes_precedence() {
        // 域名和模式都命中，但包含排除特征
        assert!(!is_video_url(
            "https://finder.video.qq.com/findersnsvideo/abc_thumb.mp4"
        ));
        assert!(!is_video_url(
            "https://wxsnsdythumb.tc.qq.com/findersnsvideo/abc.mp4"
        ));
        assert!(!is_video_url(
            "https://finder.video.qq.com/cover/video_id=123.mp4"
        ));
    }

    #[test]
    fn test_target_domain_without_pattern_no_match() {
        assert!(!is_video_url("https://channels.weixin.qq.com/web/pages/home"));
    }

    #[test]
    fn test_classify_weixin_example() {
        let c = classify("https://channels.weixin.qq.com/feed/video_id=123.mp4");
        assert!(c.is_match);
        // .mp4结尾，扩展名替换规则应该生效
        assert_eq!(
            c.cover_url.as_deref(),
            Some("https://channels.weixin.qq.com/feed/video_id=123_thumb.jpg")
        );
    }

    #[test]
    fn test_cover_url_path_swap_first() {
        let cover = extract_cover_url("https://finder.video.qq.com/findersnsvideo/abc.mp4");
        assert_eq!(
            cover.as_deref(),
            Some("https://finder.video.qq.com/findersnscover/abc.mp4")
        );
    }

    #[test]
    fn test_cover_url_none_when_no_rule_applies() {
        assert_eq!(
            extract_cover_url("https://findermp.video.qq.com/findermp/x.m3u8"),
            None
        );
    }

    #[test]
    fn test_cover_url_preserves_query() {
        let cover = extract_cover_url("https://v.qq.com/media/abc.mp4?sign=xyz");
        assert_eq!(
            cover.as_deref(),
            Some("https://v.qq.com/media/abc_thumb.jpg?sign=xyz")
        );
    }

    #[test]
    fn test_classify_no_match_has_no_cover() {
        let c = classify("https://example.com/video.mp4");
        assert!(!c.is_match);
        assert!(c.cover_url.is_none());
    }
}
