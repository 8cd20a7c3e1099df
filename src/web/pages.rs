use crate::{
    config::AppConfig,
    media::{MediaEntry, MediaKind},
};

/// HTML escape helper
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn render_preview(entry: &MediaEntry, config: &AppConfig) -> String {
    let url = html_escape(&config.media_url(&entry.filename));
    match entry.kind {
        MediaKind::Video => format!(r#"<video src="{url}" muted preload="metadata"></video>"#),
        _ => format!(r#"<img src="{url}" alt="">"#),
    }
}

/// Page listing the media directory with a manual selection form
pub fn render_select_page(files: &[MediaEntry], selected: Option<&str>, config: &AppConfig) -> String {
    let mut items = String::new();
    for entry in files {
        let name = html_escape(&entry.filename);
        let marker = if selected == Some(entry.filename.as_str()) {
            " class=\"selected\""
        } else {
            ""
        };
        items.push_str(&format!(
            r#"      <li{marker}>
        <form method="post" action="/select">
          <input type="hidden" name="media" value="{name}">
          <button type="submit">{preview}<span>{name}</span></button>
        </form>
      </li>
"#,
            preview = render_preview(entry, config),
        ));
    }

    if files.is_empty() {
        items.push_str("      <li>No media files found.</li>\n");
    }

    let current = selected.map(html_escape).unwrap_or_else(|| "nothing".to_string());

    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Select media</title>
    <style>
      ul {{ list-style: none; display: flex; flex-wrap: wrap; gap: 1em; padding: 0; }}
      li.selected button {{ outline: 3px solid #2a7; }}
      img, video {{ display: block; max-width: 160px; max-height: 120px; }}
    </style>
  </head>
  <body>
    <h1>Select media</h1>
    <p>Currently showing: <strong>{current}</strong></p>
    <ul>
{items}    </ul>
  </body>
</html>
"#
    )
}

/// Full screen page polling `/current_image`
pub fn render_display_page() -> String {
    r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>Display</title>
    <style>
      html, body { margin: 0; height: 100%; background: #000; }
      #stage { display: flex; align-items: center; justify-content: center; height: 100%; }
      #stage img, #stage video { max-width: 100%; max-height: 100%; }
    </style>
  </head>
  <body>
    <div id="stage"></div>
    <script>
      let current = null;
      async function poll() {
        try {
          const response = await fetch('/current_image');
          const data = await response.json();
          if (data.filename !== current) {
            current = data.filename;
            const stage = document.getElementById('stage');
            stage.innerHTML = '';
            if (current) {
              const element = document.createElement(data.type === 'video' ? 'video' : 'img');
              element.src = current;
              if (data.type === 'video') {
                element.autoplay = true;
                element.loop = true;
                element.muted = true;
              }
              stage.appendChild(element);
            }
          }
        } catch (e) {
          console.error('poll failed', e);
        }
      }
      setInterval(poll, 1000);
      poll();
    </script>
  </body>
</html>
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_page_marks_selection_and_escapes() {
        let config = AppConfig::default();
        let files = vec![MediaEntry::new("cat.png"), MediaEntry::new("<odd>.mp4")];

        let html = render_select_page(&files, Some("cat.png"), &config);
        assert!(html.contains(r#"<li class="selected">"#));
        assert!(html.contains("/static/images/cat.png"));
        assert!(html.contains("&lt;odd&gt;.mp4"));
        assert!(html.contains("<video"));
        assert!(!html.contains("<odd>"));
    }

    #[test]
    fn test_select_page_without_files() {
        let html = render_select_page(&[], None, &AppConfig::default());
        assert!(html.contains("No media files found."));
        assert!(html.contains("<strong>nothing</strong>"));
    }

    #[test]
    fn test_display_page_polls_current_image() {
        assert!(render_display_page().contains("/current_image"));
    }
}
