use crate::core::config_store::Lang;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    // Session
    SignIn,
    SignOut,

    // Directory
    RefreshChannelList,
    SearchChannels {
        channel_id: Option<String>,
        owner: Option<String>,
    },
    CloseChannelSearch,

    // Channel view
    OpenChannel {
        channel_id: String,
    },
    CloseChannel,

    // Pins
    PinChannel {
        channel_id: String,
    },
    UnpinChannel {
        channel_id: String,
    },
    MarkRead {
        channel_id: String,
        timestamp: u64,
    },

    // Preferences
    SetLanguage {
        lang: Lang,
    },
    SetAmbientTimeline {
        enabled: bool,
    },

    // Publishing
    CreateChannel {
        name: String,
        about: Option<String>,
        picture: Option<String>,
    },
    UpdateChannel {
        channel_id: String,
        name: String,
        about: Option<String>,
        picture: Option<String>,
    },
    SendMessage {
        channel_id: String,
        content: String,
        as_note: bool,
    },

    // Profiles
    ResolveProfile {
        identifier: String,
    },
    ForgetProfiles,

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes message content).
    pub fn tag(&self) -> &'static str {
        match self {
            // Session
            AppAction::SignIn => "SignIn",
            AppAction::SignOut => "SignOut",

            // Directory
            AppAction::RefreshChannelList => "RefreshChannelList",
            AppAction::SearchChannels { .. } => "SearchChannels",
            AppAction::CloseChannelSearch => "CloseChannelSearch",

            // Channel view
            AppAction::OpenChannel { .. } => "OpenChannel",
            AppAction::CloseChannel => "CloseChannel",

            // Pins
            AppAction::PinChannel { .. } => "PinChannel",
            AppAction::UnpinChannel { .. } => "UnpinChannel",
            AppAction::MarkRead { .. } => "MarkRead",

            // Preferences
            AppAction::SetLanguage { .. } => "SetLanguage",
            AppAction::SetAmbientTimeline { .. } => "SetAmbientTimeline",

            // Publishing
            AppAction::CreateChannel { .. } => "CreateChannel",
            AppAction::UpdateChannel { .. } => "UpdateChannel",
            AppAction::SendMessage { .. } => "SendMessage",

            // Profiles
            AppAction::ResolveProfile { .. } => "ResolveProfile",
            AppAction::ForgetProfiles => "ForgetProfiles",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
