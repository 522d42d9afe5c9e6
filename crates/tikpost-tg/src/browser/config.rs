use super::Fingerprint;
use serde::Deserialize;
use std::path::PathBuf;

/// Launch parameters of the headless browser, loaded from `BROWSER_*` env vars
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct BrowserConfig {
    pub(crate) headless: bool,
    pub(crate) no_sandbox: bool,
    pub(crate) disable_blink_features: bool,
    pub(crate) disable_web_security: bool,
    pub(crate) disable_dev_shm: bool,
    pub(crate) disable_gpu: bool,
    pub(crate) enable_webgl: bool,
    pub(crate) hide_scrollbars: bool,
    pub(crate) mute_audio: bool,
    pub(crate) window_width: u32,
    pub(crate) window_height: u32,

    /// Path to the chrome executable. It's auto-detected if not set.
    pub(crate) executable: Option<PathBuf>,

    /// Refuse to launch the browser if there are no proxies registered
    pub(crate) require_proxy: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            no_sandbox: true,
            disable_blink_features: true,
            disable_web_security: true,
            disable_dev_shm: true,
            disable_gpu: true,
            enable_webgl: true,
            hide_scrollbars: true,
            mute_audio: true,
            window_width: 1366,
            window_height: 768,
            executable: None,
            require_proxy: false,
        }
    }
}

impl BrowserConfig {
    /// Command line flags of the browser process. The proxy flag isn't
    /// included here, because the proxy is chosen at launch time.
    pub(crate) fn launch_args(&self, fingerprint: &Fingerprint) -> Vec<String> {
        let flags = [
            (
                self.disable_blink_features,
                "--disable-blink-features=AutomationControlled",
            ),
            (self.no_sandbox, "--no-sandbox"),
            (self.disable_web_security, "--disable-web-security"),
            (self.disable_dev_shm, "--disable-dev-shm-usage"),
            (self.disable_gpu, "--disable-gpu"),
        ];

        let mut args: Vec<_> = flags
            .into_iter()
            .filter(|(enabled, _)| *enabled)
            .map(|(_, flag)| flag.to_owned())
            .collect();

        args.push(format!(
            "--window-size={},{}",
            self.window_width, self.window_height
        ));

        let flags = [
            (self.enable_webgl, "--enable-webgl"),
            (self.hide_scrollbars, "--hide-scrollbars"),
            (self.mute_audio, "--mute-audio"),
        ];

        args.extend(
            flags
                .into_iter()
                .filter(|(enabled, _)| *enabled)
                .map(|(_, flag)| flag.to_owned()),
        );

        args.push(format!("--user-agent={}", fingerprint.user_agent));

        args
    }
}
