use serde::Serialize;

/// Single-recipient plain-text email handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailApiRequest {
    pub personalizations: Vec<MailPersonalization>,
    pub from: MailAddress,
    pub subject: String,
    pub content: Vec<MailContent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailPersonalization {
    pub to: Vec<MailAddress>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailAddress {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub value: String,
}

impl From<&OutboundEmail> for MailApiRequest {
    fn from(email: &OutboundEmail) -> Self {
        Self {
            personalizations: vec![MailPersonalization {
                to: vec![MailAddress {
                    email: email.to.clone(),
                }],
            }],
            from: MailAddress {
                email: email.from.clone(),
            },
            subject: email.subject.clone(),
            content: vec![MailContent {
                content_type: "text/plain".to_string(),
                value: email.body_text.clone(),
            }],
        }
    }
}
