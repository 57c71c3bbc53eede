use crate::error::WarnCode;

#[derive(Debug, Clone, Copy)]
pub struct WarnEvent<'a> {
    pub code: WarnCode,
    pub stage: &'a str,
    pub action: &'a str,
    pub path: &'a str,
    pub retry: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn render(event: &WarnEvent<'_>) -> String {
    format!(
        "TREEAI_WARN code={} stage={} action={} path={} retry={} reason={} err={}",
        event.code.as_str(),
        sanitize_value(event.stage),
        sanitize_value(event.action),
        sanitize_value(event.path),
        sanitize_value(event.retry),
        sanitize_value(event.reason),
        sanitize_value(event.err),
    )
}

pub fn emit(event: WarnEvent<'_>) {
    eprintln!("{}", render(&event));
}
