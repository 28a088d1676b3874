pub struct FormatTool;

impl FormatTool {
    // 格式化文件大小
    pub fn format_size(size: u64) -> String {
        if size == 0 {
            "未知".to_string()
        } else if size > 1024 * 1024 * 1024 {
            format!("{:.2} GB", size as f64 / 1024.0 / 1024.0 / 1024.0)
        } else if size > 1024 * 1024 {
            format!("{:.1} MB", size as f64 / 1024.0 / 1024.0)
        } else if size > 1024 {
            format!("{:.1} KB", size as f64 / 1024.0)
        } else {
            format!("{} B", size)
        }
    }

    // 格式化下载速度
    pub fn format_speed(speed: u64) -> String {
        if speed == 0 {
            "0 B/s".to_string()
        } else {
            format!("{}/s", Self::format_size(speed))
        }
    }

    // 格式化时长
    pub fn format_duration(seconds: u64) -> String {
        if seconds < 60 {
            format!("{}秒", seconds)
        } else if seconds < 3600 {
            format!("{}分{}秒", seconds / 60, seconds % 60)
        } else {
            format!("{}小时{}分", seconds / 3600, (seconds % 3600) / 60)
        }
    }
}
