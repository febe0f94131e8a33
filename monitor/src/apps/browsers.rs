pub struct KnownBrowser {
    pub name: &'static str,
    executables: &'static [&'static str],
    app_ids: &'static [&'static str],
}

pub const KNOWN_BROWSERS: &[KnownBrowser] = &[
    KnownBrowser {
        name: "Firefox",
        executables: &["firefox", "firefox-bin", "firefox-esr"],
        app_ids: &["firefox", "firefox-esr", "org.mozilla.firefox", "navigator"],
    },
    KnownBrowser {
        name: "Google Chrome",
        executables: &["chrome", "google-chrome", "google-chrome-stable"],
        app_ids: &["google-chrome", "com.google.chrome"],
    },
    KnownBrowser {
        name: "Chromium",
        executables: &["chromium", "chromium-browser"],
        app_ids: &["chromium", "chromium-browser", "org.chromium.chromium"],
    },
    KnownBrowser {
        name: "Brave",
        executables: &["brave", "brave-browser"],
        app_ids: &["brave-browser", "com.brave.browser"],
    },
    KnownBrowser {
        name: "Microsoft Edge",
        executables: &["msedge", "microsoft-edge", "microsoft-edge-stable"],
        app_ids: &["microsoft-edge", "com.microsoft.edge"],
    },
    KnownBrowser {
        name: "Vivaldi",
        executables: &["vivaldi", "vivaldi-bin", "vivaldi-stable"],
        app_ids: &["vivaldi-stable", "com.vivaldi.vivaldi"],
    },
    KnownBrowser {
        name: "Opera",
        executables: &["opera"],
        app_ids: &["opera", "com.opera.opera"],
    },
    KnownBrowser {
        name: "LibreWolf",
        executables: &["librewolf"],
        app_ids: &["librewolf", "io.gitlab.librewolf-community"],
    },
    KnownBrowser {
        name: "Zen",
        executables: &["zen", "zen-bin"],
        app_ids: &["zen", "zen-alpha", "app.zen_browser.zen"],
    },
    KnownBrowser {
        name: "Epiphany",
        executables: &["epiphany"],
        app_ids: &["org.gnome.epiphany", "epiphany"],
    },
];

pub fn find(executable_name: &str, app_id: Option<&str>) -> Option<&'static KnownBrowser> {
    let executable_name = executable_name.to_lowercase();
    let app_id = app_id.map(|id| id.trim_end_matches(".desktop").to_lowercase());

    KNOWN_BROWSERS.iter().find(|browser| {
        browser.executables.contains(&executable_name.as_str())
            || app_id
                .as_deref()
                .is_some_and(|id| browser.app_ids.contains(&id))
    })
}
