use finder_sniffer::sniffer::{classify, extract_filename, is_target_host, sanitize_filename};

#[test]
fn test_non_target_domains_never_match() {
    // 路径再像视频，域名不在清单里也不捕获
    let urls = [
        "https://evil.example.com/findersnsvideo/abc.mp4",
        "https://www.bilibili.com/video/av170001.mp4",
        "https://cdn.example.net/snsvideodownload?filekey=xxx",
    ];
    for url in urls {
        assert!(!classify(url).is_match, "误报: {}", url);
    }
}

#[test]
fn test_weixin_video_capture_with_cover() {
    let url = "https://finder.video.qq.com/251/findersnsvideo/abc123.mp4?dis_k=1";
    let result = classify(url);
    assert!(result.is_match);

    // 封面URL由视频URL的路径替换推导，查询串保留
    assert_eq!(
        result.cover_url.as_deref(),
        Some("https://finder.video.qq.com/251/findersnscover/abc123.mp4?dis_k=1")
    );
}

#[test]
fn test_thumbnails_are_excluded() {
    // 命中域名和模式但带缩略图/封面标记，排除
    let url = "https://finder.video.qq.com/findersnsvideo/abc_thumb.mp4";
    assert!(!classify(url).is_match);

    let cover = "https://finder.video.qq.com/findersnsvideo/cover.mp4";
    assert!(!classify(cover).is_match);
}

#[test]
fn test_target_host_matching() {
    assert!(is_target_host("finder.video.qq.com"));
    assert!(is_target_host("wxsnsdy.tc.qq.com"));
    assert!(!is_target_host("www.qq.com"));
    assert!(!is_target_host("example.com"));
}

#[test]
fn test_filename_extraction_and_sanitize_compose() {
    let url = "https://finder.video.qq.com/path/my%3Avideo.mp4?token=1";
    let name = sanitize_filename(&extract_filename(url));
    assert_eq!(name, "my_video.mp4");

    // 清洗是幂等的
    assert_eq!(sanitize_filename(&name), name);
}

#[test]
fn test_unextractable_url_gets_generated_name() {
    let name = extract_filename("https://finder.video.qq.com/stream?filekey=abc");
    assert!(name.starts_with("video_"));
    assert!(name.ends_with(".mp4"));

    // 同一URL生成的名字稳定（哈希部分一致）
    let again = extract_filename("https://finder.video.qq.com/stream?filekey=abc");
    let hash = |s: &str| s.rsplit('_').next().unwrap().to_string();
    assert_eq!(hash(&name), hash(&again));
}
