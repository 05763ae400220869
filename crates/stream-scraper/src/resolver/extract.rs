//! Pure extraction helpers for player and host pages.
//!
//! Nothing here touches a browser: these functions work on HTML strings and on the
//! source text recovered from a packed script. The two script constants are what the
//! resolver asks the page to evaluate.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use shared::models::StreamCandidate;

/// Resolution menu entries on the player page
pub const MENU_BUTTON_SELECTOR: &str = "#resolutionMenu button";

/// Look up a media URL the host page already exposes; evaluates to `''` when absent
pub const DIRECT_SOURCE_SCRIPT: &str = r#"(() => {
    if (typeof window.source === 'string' && window.source) return window.source;
    const el = document.querySelector('video source[src], source[src], video[src]');
    return el ? (el.getAttribute('src') || '') : '';
})()"#;

/// Global the capture wrapper writes the unpacked source into
pub const CAPTURE_MARKER: &str = "__capturedSource";

static PACKER_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"eval\(function\(p,a,c,k,e,[dr]\)").expect("packer signature should compile")
});

static SOURCE_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bsource\s*=\s*['"](https?://[^'"]+)['"]"#)
        .expect("source assignment pattern should compile")
});

static PLAYLIST_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s'"]+\.m3u8[^\s'"]*"#).expect("playlist pattern should compile")
});

static SCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script").expect("script selector should parse"));

static MENU_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(MENU_BUTTON_SELECTOR).expect("menu selector should parse"));

/// Wrap a packed script so its inner `eval` hands back the generated source
///
/// The packed body runs with `eval` shadowed by a capturing function, so the
/// unpacked player bootstrap is returned as a string and never executed.
pub fn capture_script(packed: &str) -> String {
    let body = serde_json::Value::String(packed.to_string()).to_string();
    format!(
        r#"(() => {{
    window.{marker} = '';
    const capture = (src) => {{ window.{marker} = String(src); }};
    try {{ new Function('eval', {body})(capture); }} catch (e) {{}}
    return window.{marker};
}})()"#,
        marker = CAPTURE_MARKER,
        body = body,
    )
}

/// First inline script that carries the packer signature
pub fn find_packed_script(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&SCRIPT_SELECTOR)
        .map(|script| script.text().collect::<String>())
        .find(|text| PACKER_SIGNATURE.is_match(text))
        .map(|text| text.trim().to_string())
}

/// Media URL from unpacked player source
pub fn extract_media_url(source: &str) -> Option<String> {
    if let Some(caps) = SOURCE_ASSIGNMENT.captures(source) {
        return Some(caps[1].to_string());
    }
    PLAYLIST_URL.find(source).map(|m| m.as_str().to_string())
}

/// Stream candidates in menu order
///
/// Buttons without a host URL are skipped and exact duplicates collapsed. The
/// quality label prefers `data-resolution` ("1080" -> "1080p") over the button text.
pub fn parse_candidates(html: &str) -> Vec<StreamCandidate> {
    let document = Html::parse_document(html);
    let mut candidates: Vec<StreamCandidate> = Vec::new();

    for button in document.select(&MENU_SELECTOR) {
        let attrs = button.value();
        let Some(host_url) = attrs.attr("data-src").map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };

        let quality_label = match attrs.attr("data-resolution").map(str::trim) {
            Some(res) if !res.is_empty() => format_resolution(res),
            _ => button.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "),
        };

        let audio_label = attrs
            .attr("data-audio")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();

        let candidate = StreamCandidate {
            quality_label,
            audio_label,
            host_url: host_url.to_string(),
        };
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    candidates
}

fn format_resolution(res: &str) -> String {
    if res.chars().all(|c| c.is_ascii_digit()) {
        format!("{}p", res)
    } else {
        res.to_string()
    }
}

/// Accept only absolute http(s) URLs from the page
pub fn as_media_url(value: &serde_json::Value) -> Option<String> {
    let url = value.as_str()?.trim();
    if url.starts_with("http") {
        Some(url.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MENU_HTML: &str = r#"
        <div id="resolutionMenu">
            <button data-src="https://host.test/e/aaa" data-resolution="1080"
                    data-audio="jpn">SubGroup · 1080p</button>
            <button data-src="https://host.test/e/bbb" data-resolution="720"
                    data-audio="eng">SubGroup · 720p (eng)</button>
            <button data-src="https://host.test/e/aaa" data-resolution="1080"
                    data-audio="jpn">duplicate</button>
            <button data-resolution="360">no source</button>
            <button data-src="https://host.test/e/ccc">  Backup
                360p </button>
        </div>
        <div id="other"><button data-src="https://elsewhere.test">x</button></div>
    "#;

    #[test]
    fn test_parse_candidates() {
        let candidates = parse_candidates(MENU_HTML);
        assert_eq!(candidates.len(), 3);

        assert_eq!(candidates[0].quality_label, "1080p");
        assert_eq!(candidates[0].audio_label, "jpn");
        assert_eq!(candidates[0].host_url, "https://host.test/e/aaa");

        assert_eq!(candidates[1].quality_label, "720p");
        assert_eq!(candidates[1].audio_label, "eng");

        assert_eq!(candidates[2].quality_label, "Backup 360p");
        assert_eq!(candidates[2].audio_label, "unknown");
    }

    #[test]
    fn test_parse_candidates_without_menu() {
        assert!(parse_candidates("<html><body><p>nothing</p></body></html>").is_empty());
    }

    #[test]
    fn test_find_packed_script() {
        let html = r#"<html><head>
            <script>var player = {};</script>
            <script>eval(function(p,a,c,k,e,d){return p}('0 1',2,2,'a|b'.split('|'),0,{}))</script>
        </head></html>"#;
        let packed = find_packed_script(html).unwrap();
        assert!(packed.starts_with("eval(function(p,a,c,k,e,d)"));

        assert!(find_packed_script("<script>console.log(1)</script>").is_none());
    }

    #[test]
    fn test_extract_media_url() {
        let unpacked = concat!(
            "const player=new Plyr('#player');",
            "const source='https://cdn.test/stream/uwu.m3u8';",
            "hls.loadSource(source)"
        );
        assert_eq!(
            extract_media_url(unpacked).as_deref(),
            Some("https://cdn.test/stream/uwu.m3u8")
        );

        let loose = r#"player.src({file:"https://cdn.test/a/b.m3u8?token=1"})"#;
        assert_eq!(
            extract_media_url(loose).as_deref(),
            Some("https://cdn.test/a/b.m3u8?token=1")
        );

        assert!(extract_media_url("var x = 1;").is_none());
    }

    #[test]
    fn test_capture_script_embeds_escaped_payload() {
        let script = capture_script("eval(function(p,a,c,k,e,d){return 'a\"b'}())");
        assert!(script.contains(CAPTURE_MARKER));
        let expected = r#"new Function('eval', "eval(function(p,a,c,k,e,d){return 'a\"b'}())")"#;
        assert!(script.contains(expected));
    }

    #[test]
    fn test_as_media_url() {
        assert_eq!(
            as_media_url(&json!(" https://cdn/x.m3u8 ")).as_deref(),
            Some("https://cdn/x.m3u8")
        );
        assert!(as_media_url(&json!("")).is_none());
        assert!(as_media_url(&json!("blob:abc")).is_none());
        assert!(as_media_url(&json!(null)).is_none());
    }
}
