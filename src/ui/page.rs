/// Render the chat page for `model`.
pub fn chat_page(model: &str) -> String {
    html_shell("Gemini AI Chatbot", &chat_content(&escape_html(model)))
}

/// Escape text for use in HTML element content and attribute values.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

/// Generate the HTML shell for the application.
fn html_shell(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="Chat with Google Gemini">
    <title>{title}</title>
    <style>{STYLE}</style>
</head>
<body>
    <main id="app">
        {content}
    </main>
    <script>{SCRIPT}</script>
</body>
</html>"#
    )
}

/// Chat page content.
fn chat_content(model: &str) -> String {
    format!(
        r#"
        <header class="page-header">
            <h1 class="main-header">💬 Gemini AI Chatbot</h1>
            <p class="sub-header">Advanced AI-Powered Conversation Assistant ({model})</p>
            <button id="new-chat" type="button" class="secondary">New chat</button>
        </header>

        <div id="empty-banner" class="info-card">
            This app uses the Gemini API. Your conversations are not stored permanently.
        </div>

        <section id="messages" aria-live="polite"></section>

        <div id="thinking" class="thinking" hidden>🧠 Thinking...</div>

        <form id="chat-form" autocomplete="off">
            <textarea name="message" rows="1" placeholder="Type your message here..." required></textarea>
            <button type="submit">Send</button>
        </form>
        "#
    )
}

const STYLE: &str = r"
body { margin: 0; font-family: system-ui, sans-serif; background: #fafafa; color: #222; }
#app { max-width: 760px; margin: 0 auto; padding: 1.5rem 1rem 7rem; }
.page-header { text-align: center; }
.main-header { color: #2E86AB; font-size: 2.5rem; margin-bottom: 0.25rem; }
.sub-header { color: #666; font-style: italic; margin-top: 0; }
.info-card { background: #f0f2ff; padding: 1rem 1.25rem; border-left: 4px solid #667eea; border-radius: 10px; margin: 1rem 0; }
.message { padding: 0.75rem 1rem; border-radius: 12px; margin: 0.5rem 0; white-space: pre-wrap; }
.message.user { background: #e8ecff; margin-left: 15%; }
.message.assistant { background: #fff; border: 1px solid #e4e4e4; margin-right: 15%; }
.message.error { background: #fdecea; color: #8a1c14; }
.message.warning { background: #fff6e0; color: #7a5200; }
.thinking { color: #666; padding: 0.5rem 1rem; }
#chat-form { position: fixed; bottom: 0; left: 0; right: 0; display: flex; gap: 0.5rem; padding: 1rem; background: #fafafa; max-width: 760px; margin: 0 auto; }
#chat-form textarea { flex: 1; resize: none; padding: 0.75rem; border-radius: 12px; border: 1px solid #ccc; font: inherit; }
button { background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: #fff; border: none; border-radius: 20px; padding: 0.6rem 1.4rem; font-weight: bold; cursor: pointer; }
button.secondary { padding: 0.4rem 1rem; font-size: 0.9rem; }
button:disabled { opacity: 0.5; cursor: not-allowed; }
@media (prefers-color-scheme: dark) {
  body, #chat-form { background: #16161a; color: #eee; }
  .info-card { background: rgba(102, 126, 234, 0.1); }
  .message.user { background: #2a2f4a; }
  .message.assistant { background: #1f1f24; border-color: #333; }
}
";

const SCRIPT: &str = r#"
(() => {
  const STORAGE_KEY = "gemini-chatbot.session";
  const form = document.getElementById("chat-form");
  const input = form.querySelector("textarea");
  const sendButton = form.querySelector("button");
  const messages = document.getElementById("messages");
  const banner = document.getElementById("empty-banner");
  const thinking = document.getElementById("thinking");
  const newChat = document.getElementById("new-chat");

  let sessionId = localStorage.getItem(STORAGE_KEY);
  let busy = false;

  function setSession(id) {
    sessionId = id;
    if (id) localStorage.setItem(STORAGE_KEY, id);
    else localStorage.removeItem(STORAGE_KEY);
  }

  function addBubble(kind, text) {
    const el = document.createElement("div");
    el.className = "message " + kind;
    el.textContent = text;
    messages.appendChild(el);
    el.scrollIntoView({ block: "end" });
    return el;
  }

  function refreshBanner() {
    banner.hidden = messages.querySelector(".message.assistant") !== null;
  }

  function setBusy(value) {
    busy = value;
    thinking.hidden = !value;
    sendButton.disabled = value;
    newChat.disabled = value;
  }

  async function loadHistory() {
    if (!sessionId) return refreshBanner();
    const res = await fetch(`/api/sessions/${encodeURIComponent(sessionId)}/messages`);
    if (res.status === 404) {
      setSession(null);
      return refreshBanner();
    }
    if (res.status === 409) {
      // A reply for this session is still running.
      setTimeout(loadHistory, 1000);
      return;
    }
    if (!res.ok) return refreshBanner();
    for (const m of await res.json()) addBubble(m.role, m.text);
    refreshBanner();
  }

  function showError(message) {
    addBubble("error", "An error occurred: " + message);
    addBubble("warning", "Please check your API key or try again later.");
  }

  function send(text) {
    addBubble("user", text);
    setBusy(true);

    const params = new URLSearchParams({ message: text });
    if (sessionId) params.set("session_id", sessionId);
    const source = new EventSource("/api/chat/stream?" + params.toString());
    let reply = null;
    let finished = false;

    const finish = () => {
      finished = true;
      source.close();
      setBusy(false);
      refreshBanner();
      input.focus();
    };

    source.addEventListener("stream.start", (e) => {
      setSession(JSON.parse(e.data).data.session_id);
    });
    source.addEventListener("message.delta", (e) => {
      const { text } = JSON.parse(e.data).data;
      thinking.hidden = true;
      if (!reply) reply = addBubble("assistant", "");
      reply.textContent += text;
      reply.scrollIntoView({ block: "end" });
    });
    source.addEventListener("error", (e) => {
      if (!e.data) return;
      if (reply) reply.remove();
      showError(JSON.parse(e.data).data.message);
    });
    source.addEventListener("done", finish);
    // Server-sent `error` events also reach onerror; only transport errors lack data.
    source.onerror = (e) => {
      if (finished || e.data) return;
      if (reply) reply.remove();
      showError("connection to the server was lost");
      finish();
    };
  }

  form.addEventListener("submit", (e) => {
    e.preventDefault();
    const text = input.value.trim();
    if (!text || busy) return;
    input.value = "";
    send(text);
  });

  input.addEventListener("keydown", (e) => {
    if (e.key === "Enter" && !e.shiftKey) {
      e.preventDefault();
      form.requestSubmit();
    }
  });

  newChat.addEventListener("click", async () => {
    if (busy) return;
    const res = await fetch("/api/sessions", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ replaces: sessionId }),
    });
    if (!res.ok) return;
    setSession((await res.json()).id);
    messages.replaceChildren();
    refreshBanner();
  });

  loadHistory();
})();
"#;
