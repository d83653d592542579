//! 事件流文本编码
//!
//! 帧格式：可选 `id:`、可选 `event:`、一行或多行 `data:`（data 中每个换行各自加前缀）、
//! 可选 `retry:`，以空行结束。decode 供客户端与测试把字节流还原为帧。

use crate::broker::SseFrame;

/// 保活注释帧；解码时跳过
pub const KEEP_ALIVE: &str = ": keep-alive\n\n";

pub fn encode(frame: &SseFrame) -> String {
    let mut out = String::with_capacity(frame.data.len() + 64);
    if let Some(id) = &frame.id {
        out.push_str("id: ");
        out.push_str(id);
        out.push('\n');
    }
    if let Some(event) = &frame.event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in frame.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line.strip_suffix('\r').unwrap_or(line));
        out.push('\n');
    }
    if let Some(retry) = frame.retry {
        out.push_str(&format!("retry: {retry}\n"));
    }
    out.push('\n');
    out
}

/// 解析若干完整帧；末尾未以空行结束的部分忽略，注释行（`:` 开头）跳过
pub fn decode(text: &str) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    let mut current = SseFrame::default();
    let mut data_lines: Vec<&str> = Vec::new();
    let mut has_fields = false;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if has_fields {
                current.data = data_lines.join("\n");
                frames.push(std::mem::take(&mut current));
                data_lines.clear();
                has_fields = false;
            }
            continue;
        }
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        has_fields = true;
        match field {
            "id" => current.id = Some(value.to_string()),
            "event" => current.event = Some(value.to_string()),
            "data" => data_lines.push(value),
            "retry" => current.retry = value.parse().ok(),
            _ => {}
        }
    }
    frames
}
