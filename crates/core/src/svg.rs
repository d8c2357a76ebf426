//! SVG export of a panel's render commands. The browser turns the document
//! into a PNG download; the terminal front end writes it to disk.

use std::fmt::Write as _;

use profview_protocol::{RenderCommand, ThemeToken};

/// Render a list of commands as a standalone SVG document.
pub fn render_svg(commands: &[RenderCommand], width: f64, height: f64) -> String {
    let mut svg = String::with_capacity(commands.len() * 160);
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {width} {height}" width="{width}" height="{height}" style="font-family:Verdana,sans-serif;font-size:12px">"#,
    );
    let _ = write!(
        svg,
        r#"<rect width="{width}" height="{height}" fill="{}"/>"#,
        resolve_color(ThemeToken::Background)
    );

    let mut clips = 0usize;
    let mut clip_open = false;
    for cmd in commands {
        match cmd {
            RenderCommand::DrawRect {
                rect,
                color,
                border_color,
                label,
                ..
            } => {
                let stroke = border_color
                    .map(|b| format!(r#" stroke="{}" stroke-width="0.5""#, resolve_color(b)))
                    .unwrap_or_default();
                let _ = write!(
                    svg,
                    r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}"{stroke}>"#,
                    rect.x,
                    rect.y,
                    rect.w,
                    rect.h,
                    resolve_color(*color),
                );
                if let Some(label) = label {
                    let _ = write!(svg, "<title>{}</title>", escape_xml(label));
                }
                svg.push_str("</rect>");

                if let Some(label) = label
                    && rect.w > 30.0
                {
                    let max_chars = (rect.w / 7.0) as usize;
                    let text = if label.chars().count() > max_chars && max_chars > 2 {
                        let truncated: String = label.chars().take(max_chars - 2).collect();
                        format!("{truncated}..")
                    } else {
                        label.to_string()
                    };
                    let _ = write!(
                        svg,
                        r#"<text x="{}" y="{}" fill="{}" style="pointer-events:none">{}</text>"#,
                        rect.x + 3.0,
                        rect.y + rect.h * 0.75,
                        resolve_color(ThemeToken::TextPrimary),
                        escape_xml(&text),
                    );
                }
            }
            RenderCommand::DrawLine {
                from,
                to,
                color,
                width: line_width,
                dashed,
            } => {
                let dash = if *dashed {
                    r#" stroke-dasharray="6 4""#
                } else {
                    ""
                };
                let _ = write!(
                    svg,
                    r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="{line_width}"{dash}/>"#,
                    from.x,
                    from.y,
                    to.x,
                    to.y,
                    resolve_color(*color),
                );
            }
            RenderCommand::DrawText {
                text,
                position,
                color,
                font_size,
                align,
            } => {
                let anchor = match align {
                    profview_protocol::TextAlign::Left => "start",
                    profview_protocol::TextAlign::Center => "middle",
                    profview_protocol::TextAlign::Right => "end",
                };
                let _ = write!(
                    svg,
                    r#"<text x="{}" y="{}" fill="{}" font-size="{font_size}" text-anchor="{anchor}">{}</text>"#,
                    position.x,
                    position.y,
                    resolve_color(*color),
                    escape_xml(text),
                );
            }
            RenderCommand::SetClip { rect } => {
                if clip_open {
                    svg.push_str("</g>");
                }
                clips += 1;
                let _ = write!(
                    svg,
                    r#"<clipPath id="clip{clips}"><rect x="{}" y="{}" width="{}" height="{}"/></clipPath><g clip-path="url(#clip{clips})">"#,
                    rect.x, rect.y, rect.w, rect.h,
                );
                clip_open = true;
            }
            RenderCommand::ClearClip => {
                if clip_open {
                    svg.push_str("</g>");
                    clip_open = false;
                }
            }
            RenderCommand::BeginGroup { .. } | RenderCommand::EndGroup => {}
        }
    }

    if clip_open {
        svg.push_str("</g>");
    }
    svg.push_str("</svg>");
    svg
}

/// Light palette, matching the browser viewer.
pub fn resolve_color(token: ThemeToken) -> &'static str {
    match token {
        ThemeToken::FlameHot => "#e5402a",
        ThemeToken::FlameWarm => "#f0883a",
        ThemeToken::FlameNeutral => "#f6c36a",
        ThemeToken::MetricHeavy => "#2e8b3e",
        ThemeToken::MetricMedium => "#5cb85c",
        ThemeToken::MetricLight => "#a3d9a5",
        ThemeToken::FlameCold => "#039dfc",
        ThemeToken::FlameCompressed => "#cc99ff",
        ThemeToken::SearchHighlight => "#ee00ee",
        ThemeToken::LifetimeBand => "#aa0000",
        ThemeToken::OffCpuBand => "#0294e3",
        ThemeToken::WarningText => "#ff0000",
        ThemeToken::WindowHeaderFocused | ThemeToken::WindowHeaderTextUnfocused => "#000000",
        ThemeToken::WindowHeaderUnfocused => "#d3d3d3",
        ThemeToken::WindowHeaderTextFocused => "#ffffff",
        ThemeToken::CeilingL1 => "#8b0000",
        ThemeToken::CeilingL2 => "#006400",
        ThemeToken::CeilingL3 => "#00008b",
        ThemeToken::CeilingDram => "#a9a9a9",
        ThemeToken::CeilingFp | ThemeToken::Axis | ThemeToken::TextPrimary => "#000000",
        ThemeToken::GroupLabel => "#1a1a1a",
        ThemeToken::GridLine | ThemeToken::Border => "#dddddd",
        ThemeToken::TextSecondary => "#555555",
        ThemeToken::TextMuted => "#888888",
        ThemeToken::Background => "#ffffff",
        ThemeToken::Surface => "#f5f5f5",
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
