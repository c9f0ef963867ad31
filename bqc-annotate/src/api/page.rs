//! Shared page chrome

use bqc_common::html::escape;

const STYLE: &str = r#"
        body {
            font-family: system-ui, -apple-system, sans-serif;
            max-width: 1200px;
            margin: 30px auto;
            padding: 0 20px;
            line-height: 1.5;
        }
        h1 {
            color: #333;
            border-bottom: 2px solid #0066cc;
            padding-bottom: 10px;
        }
        table { border-collapse: collapse; width: 100%; }
        th, td { border-bottom: 1px solid #ddd; padding: 6px 8px; text-align: left; }
        th { background: #f5f5f5; }
        .button {
            display: inline-block;
            padding: 8px 16px;
            background: #0066cc;
            color: white;
            text-decoration: none;
            border: none;
            border-radius: 4px;
            cursor: pointer;
        }
        .button:hover { background: #0052a3; }
        .rating-pass { color: #1a7f37; font-weight: bold; }
        .rating-fail { color: #cf222e; font-weight: bold; }
        .rating-uncertain { color: #9a6700; font-weight: bold; }
        .unrated { color: #888; }
        .montage { max-width: 100%; background: #000; margin: 6px 0 16px; }
        .missing { color: #888; font-style: italic; }
        nav a { margin-right: 12px; }
"#;

/// Wrap a page body in the common document
pub fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{style}</style>
</head>
<body>
{body}
    <p><small>annotate-struct v{version}</small></p>
</body>
</html>
"#,
        title = escape(title),
        style = STYLE,
        body = body,
        version = env!("CARGO_PKG_VERSION"),
    )
}

/// Rating cell content
pub fn rating_badge(rating: Option<bqc_common::Rating>) -> String {
    match rating {
        Some(r) => format!(r#"<span class="rating-{0}">{0}</span>"#, r.as_str()),
        None => r#"<span class="unrated">unrated</span>"#.to_string(),
    }
}
