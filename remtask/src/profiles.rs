//! Saved connection profiles: profile name -> { url, tls_ca, token }.
//! Stored at $XDG_CONFIG_HOME/remtask/profiles.json (fallback: platform config dir).

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io, path::PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProfileEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileEntry>,
    #[serde(default)]
    pub version: u32,
}

pub fn config_dir() -> PathBuf {
    match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg) => PathBuf::from(xdg).join("remtask"),
        None => dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("remtask"),
    }
}

pub fn profiles_path() -> PathBuf {
    config_dir().join("profiles.json")
}

/// Missing or unreadable files load as empty.
pub fn load_profiles() -> ProfilesFile {
    fs::read_to_string(profiles_path())
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub fn save_profiles(p: &ProfilesFile) -> io::Result<()> {
    let path = profiles_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(p).map_err(io::Error::other)?;
    fs::write(path, data)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResolveProfile {
    /// Runtime inputs; the caller decides whether to persist them.
    Direct(ProfileEntry),
    Loaded(ProfileEntry),
    PromptSelect(Vec<String>),
    /// Named profile does not exist yet.
    PromptCreate(String),
    None,
}

#[derive(Debug, Default)]
pub struct ProfileRequest {
    pub profile_name: Option<String>,
    pub url: Option<String>,
    pub tls_ca: Option<String>,
    pub token: Option<String>,
}

impl ProfileRequest {
    pub fn resolve(self, pf: &ProfilesFile) -> ResolveProfile {
        match (self.url, self.profile_name) {
            (Some(url), _) => ResolveProfile::Direct(ProfileEntry {
                url,
                tls_ca: self.tls_ca,
                token: self.token,
            }),
            (None, Some(name)) => match pf.profiles.get(&name) {
                Some(entry) => {
                    let mut entry = entry.clone();
                    // flags given alongside a profile override what was saved
                    if self.tls_ca.is_some() {
                        entry.tls_ca = self.tls_ca;
                    }
                    if self.token.is_some() {
                        entry.token = self.token;
                    }
                    ResolveProfile::Loaded(entry)
                }
                None => ResolveProfile::PromptCreate(name),
            },
            (None, None) if pf.profiles.is_empty() => ResolveProfile::None,
            (None, None) => ResolveProfile::PromptSelect(pf.profiles.keys().cloned().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with(name: &str, url: &str) -> ProfilesFile {
        let mut pf = ProfilesFile::default();
        pf.profiles.insert(
            name.into(),
            ProfileEntry {
                url: url.into(),
                ..Default::default()
            },
        );
        pf
    }

    #[test]
    fn url_wins_over_profile() {
        let pf = file_with("prod", "ws://old:3000/ws");
        let req = ProfileRequest {
            profile_name: Some("prod".into()),
            url: Some("ws://new:3000/ws".into()),
            ..Default::default()
        };
        match req.resolve(&pf) {
            ResolveProfile::Direct(e) => assert_eq!(e.url, "ws://new:3000/ws"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn profile_only_loads_or_prompts() {
        let pf = file_with("prod", "ws://old:3000/ws");
        let loaded = ProfileRequest {
            profile_name: Some("prod".into()),
            token: Some("s3cret".into()),
            ..Default::default()
        }
        .resolve(&pf);
        assert_eq!(
            loaded,
            ResolveProfile::Loaded(ProfileEntry {
                url: "ws://old:3000/ws".into(),
                tls_ca: None,
                token: Some("s3cret".into()),
            })
        );
        let missing = ProfileRequest {
            profile_name: Some("qa".into()),
            ..Default::default()
        }
        .resolve(&pf);
        assert_eq!(missing, ResolveProfile::PromptCreate("qa".into()));
    }

    #[test]
    fn nothing_given_selects_or_gives_up() {
        let pf = file_with("prod", "ws://old:3000/ws");
        assert_eq!(
            ProfileRequest::default().resolve(&pf),
            ResolveProfile::PromptSelect(vec!["prod".into()])
        );
        assert_eq!(
            ProfileRequest::default().resolve(&ProfilesFile::default()),
            ResolveProfile::None
        );
    }
}
