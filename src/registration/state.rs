use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Steps of the registration flow, in the order a visitor walks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Start,
    Phone,
    YourInformation,
    TransitionEmails,
    Finish,
}

impl FlowState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Phone => "phone",
            Self::YourInformation => "your_information",
            Self::TransitionEmails => "transition_emails",
            Self::Finish => "finish",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "start" => Some(Self::Start),
            "phone" => Some(Self::Phone),
            "your_information" => Some(Self::YourInformation),
            "transition_emails" => Some(Self::TransitionEmails),
            "finish" => Some(Self::Finish),
            _ => None,
        }
    }

    /// Location of the step's view.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Start => "/v1/register/start",
            Self::Phone => "/v1/register/phone/code",
            Self::YourInformation => "/v1/register/your-information",
            Self::TransitionEmails => "/v1/register/transition-emails",
            Self::Finish => "/v1/register/finish",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for state in [
            FlowState::Start,
            FlowState::Phone,
            FlowState::YourInformation,
            FlowState::TransitionEmails,
            FlowState::Finish,
        ] {
            assert_eq!(FlowState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(FlowState::from_str("done"), None);
    }

    #[test]
    fn serde_matches_as_str() -> anyhow::Result<()> {
        let encoded = serde_json::to_string(&FlowState::YourInformation)?;
        assert_eq!(encoded, "\"your_information\"");
        Ok(())
    }

    #[test]
    fn each_step_has_its_own_path() {
        assert_eq!(FlowState::Phone.path(), "/v1/register/phone/code");
        assert_eq!(FlowState::Finish.path(), "/v1/register/finish");
    }
}
