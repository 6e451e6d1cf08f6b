//! Service-to-scope registry.
//!
//! Maps the closed set of supported Google services to the OAuth scopes they
//! require and computes deterministic scope unions for authorization URLs.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A service identifier unknown to the registry.
#[derive(Debug, Error)]
#[error("unknown service {0:?} (expected gmail|calendar|chat|classroom|drive|docs|contacts|tasks|people|sheets|groups|keep)")]
pub struct UnknownService(pub String);

/// Supported Google services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Gmail,
    Calendar,
    Chat,
    Classroom,
    Drive,
    Docs,
    Contacts,
    Tasks,
    People,
    Sheets,
    Groups,
    Keep,
}

impl Service {
    /// Parse a service name. Input is trimmed and lowercased before matching.
    pub fn parse(s: &str) -> Result<Self, UnknownService> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Service::Gmail),
            "calendar" => Ok(Service::Calendar),
            "chat" => Ok(Service::Chat),
            "classroom" => Ok(Service::Classroom),
            "drive" => Ok(Service::Drive),
            "docs" => Ok(Service::Docs),
            "contacts" => Ok(Service::Contacts),
            "tasks" => Ok(Service::Tasks),
            "people" => Ok(Service::People),
            "sheets" => Ok(Service::Sheets),
            "groups" => Ok(Service::Groups),
            "keep" => Ok(Service::Keep),
            _ => Err(UnknownService(s.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Service::Gmail => "gmail",
            Service::Calendar => "calendar",
            Service::Chat => "chat",
            Service::Classroom => "classroom",
            Service::Drive => "drive",
            Service::Docs => "docs",
            Service::Contacts => "contacts",
            Service::Tasks => "tasks",
            Service::People => "people",
            Service::Sheets => "sheets",
            Service::Groups => "groups",
            Service::Keep => "keep",
        }
    }

    /// OAuth scopes required by this service.
    pub fn scopes(&self) -> &'static [&'static str] {
        match self {
            Service::Gmail => &["https://mail.google.com/"],
            Service::Calendar => &["https://www.googleapis.com/auth/calendar"],
            Service::Chat => &[
                "https://www.googleapis.com/auth/chat.spaces",
                "https://www.googleapis.com/auth/chat.messages",
            ],
            Service::Classroom => &[
                "https://www.googleapis.com/auth/classroom.courses",
                "https://www.googleapis.com/auth/classroom.rosters.readonly",
            ],
            Service::Drive => &["https://www.googleapis.com/auth/drive"],
            Service::Docs => &["https://www.googleapis.com/auth/documents"],
            Service::Contacts => &[
                "https://www.googleapis.com/auth/contacts",
                "https://www.googleapis.com/auth/contacts.other.readonly",
                "https://www.googleapis.com/auth/directory.readonly",
            ],
            Service::Tasks => &["https://www.googleapis.com/auth/tasks"],
            // Needed for "people/me" requests.
            Service::People => &["profile"],
            Service::Sheets => &["https://www.googleapis.com/auth/spreadsheets"],
            Service::Groups => &["https://www.googleapis.com/auth/cloud-identity.groups.readonly"],
            Service::Keep => &["https://www.googleapis.com/auth/keep"],
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Default services for consumer ("regular") accounts. Keep requires a
/// Workspace service account and is excluded from interactive authorization.
pub fn user_services() -> Vec<Service> {
    vec![
        Service::Gmail,
        Service::Calendar,
        Service::Chat,
        Service::Classroom,
        Service::Drive,
        Service::Docs,
        Service::Contacts,
        Service::Tasks,
        Service::People,
        Service::Sheets,
        Service::Groups,
    ]
}

pub fn all_services() -> Vec<Service> {
    let mut out = user_services();
    out.push(Service::Keep);
    out
}

/// Sorted, deduplicated union of the scopes required by `services`.
///
/// The ordering is lexicographic and therefore stable across calls and input
/// orderings; the authorization URL builder and granted-scope comparisons
/// depend on byte-identical output for the same input set.
pub fn scopes_for_services(services: &[Service]) -> Vec<String> {
    let mut set = BTreeSet::new();
    for svc in services {
        for scope in svc.scopes() {
            set.insert(*scope);
        }
    }
    set.into_iter().map(String::from).collect()
}
