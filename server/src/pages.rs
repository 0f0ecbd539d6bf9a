// server/src/pages.rs
//
// Páginas HTML mínimas: formulario de subida y resultado del modo sync.

use common::{TaskInfo, ALLOWED_EXTENSIONS};

use crate::config::Mode;

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"es\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        body
    )
}

// En modo async el form se manda por fetch y se consulta /check_result
const ASYNC_SCRIPT: &str = r#"<script>
const form = document.getElementById('upload-form');
const status = document.getElementById('status');
form.addEventListener('submit', async (ev) => {
  ev.preventDefault();
  status.textContent = 'Subiendo...';
  const res = await fetch('/upload', { method: 'POST', body: new FormData(form) });
  const data = await res.json();
  if (!data.success) { status.textContent = data.error; return; }
  status.textContent = 'Procesando...';
  const poll = setInterval(async () => {
    const r = await (await fetch('/check_result/' + data.task_id)).json();
    if (r.status === 'completed') {
      clearInterval(poll);
      status.innerHTML = '<video controls src="' + r.output_url + '" width="640"></video>';
    } else if (r.status === 'failed') {
      clearInterval(poll);
      status.textContent = r.error || 'Error durante el procesamiento';
    }
  }, 2000);
});
</script>"#;

pub fn index_page(flash: Option<&str>, mode: Mode) -> String {
    let flash_html = flash
        .filter(|m| !m.is_empty())
        .map(|m| format!("<p class=\"flash\">{}</p>\n", escape_html(m)))
        .unwrap_or_default();

    let accept = ALLOWED_EXTENSIONS
        .iter()
        .map(|e| format!(".{e}"))
        .collect::<Vec<_>>()
        .join(",");

    let script = match mode {
        Mode::Async => ASYNC_SCRIPT,
        Mode::Sync => "",
    };

    let body = format!(
        "<h1>Detector de baches</h1>\n{flash_html}\
         <form id=\"upload-form\" action=\"/upload\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <input type=\"file\" name=\"video\" accept=\"{accept}\">\n\
         <button type=\"submit\">Detectar</button>\n</form>\n\
         <div id=\"status\"></div>\n{script}"
    );

    layout("Detector de baches", &body)
}

pub fn result_page(task: &TaskInfo, message: &str) -> String {
    let url = escape_html(&task.output_url());
    let body = format!(
        "<h1>{}</h1>\n<p>Video original: {}</p>\n\
         <video controls width=\"640\" src=\"{url}\"></video>\n\
         <p><a href=\"{url}\">{}</a></p>\n<p><a href=\"/\">Subir otro video</a></p>",
        escape_html(message),
        escape_html(&task.original_filename),
        escape_html(&task.output_filename),
    );

    layout("Resultado", &body)
}
