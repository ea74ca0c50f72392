//! Per-tab evasion: user-agent rotation, fingerprint hardening script and
//! locale/timezone overrides matching the French market we search in.

use anyhow::Result;
use headless_chrome::protocol::cdp::Emulation::{SetLocaleOverride, SetTimezoneOverride};
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::Tab;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
    ]
});

const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

const TIMEZONE: &str = "Europe/Paris";
const LOCALE: &str = "fr-FR";
const ACCEPT_LANGUAGE: &str = "fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7";

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_USER_AGENT)
}

/// Hardening script evaluated before any page script runs.
/// Hardware values are randomised per tab.
pub fn get_stealth_script() -> String {
    let (cores, memory) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(2..=8) * 2, [4, 8, 16][rng.gen_range(0..3)])
    };

    format!(
        r#"
        Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
        Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {cores} }});
        Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {memory} }});
        Object.defineProperty(navigator, 'languages', {{ get: () => ['fr-FR', 'fr', 'en-US', 'en'] }});
        Object.defineProperty(navigator, 'plugins', {{
            get: () => [
                {{ name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' }},
                {{ name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' }},
            ],
        }});

        window.chrome = window.chrome || {{
            runtime: {{
                connect: function() {{}},
                sendMessage: function() {{}},
                onMessage: {{ addListener: function() {{}}, removeListener: function() {{}} }},
            }},
            csi: function() {{}},
            loadTimes: function() {{ return {{}}; }},
        }};

        const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
        if (originalQuery) {{
            window.navigator.permissions.query = (parameters) => (
                parameters.name === 'notifications'
                    ? Promise.resolve({{ state: Notification.permission }})
                    : originalQuery(parameters)
            );
        }}

        const getParameter = WebGLRenderingContext.prototype.getParameter;
        WebGLRenderingContext.prototype.getParameter = function(parameter) {{
            if (parameter === 37445) return 'Intel Inc.';
            if (parameter === 37446) return 'Intel Iris OpenGL Engine';
            return getParameter.call(this, parameter);
        }};
    "#
    )
}

/// Blocking: call from a `spawn_blocking` context, before the first navigation.
pub fn prepare_tab(tab: &Tab) -> Result<()> {
    tab.set_user_agent(random_user_agent(), Some(ACCEPT_LANGUAGE), None)?;

    tab.call_method(AddScriptToEvaluateOnNewDocument {
        source: get_stealth_script(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })?;

    tab.call_method(SetTimezoneOverride {
        timezone_id: TIMEZONE.to_string(),
    })?;
    tab.call_method(SetLocaleOverride {
        locale: Some(LOCALE.to_string()),
    })?;

    Ok(())
}
