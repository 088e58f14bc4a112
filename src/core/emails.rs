use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::{render, Config};
use crate::core::samples::CollectRunfolderSamples;
use crate::logger::AdLogger;
use crate::pipeline::Pipeline;

const EMAIL_TEMPLATE: &str = include_str!("../../templates/pipeline_email.html");

/// A rendered HTML email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub recipients: Vec<String>,
    pub html: String,
    pub priority: u8,
}

/// Outgoing mail transport
pub trait Mailer {
    fn send(&self, email: &Email) -> anyhow::Result<()>;
}

#[derive(Clone)]
struct XPriority(u8);

impl Header for XPriority {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Priority")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.trim().parse()?))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.to_string())
    }
}

/// SMTP relay over STARTTLS with credentials from the config
pub struct SmtpMailer {
    host: String,
    port: u16,
    sender: String,
    user: String,
    password: String,
}

impl SmtpMailer {
    pub fn new(config: &Config, password: &str) -> Self {
        Self {
            host: config.email.host.clone(),
            port: config.email.port,
            sender: config.email.sender.clone(),
            user: config.email.user.clone(),
            password: password.to_string(),
        }
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, email: &Email) -> anyhow::Result<()> {
        let mut builder = Message::builder()
            .from(self.sender.parse::<Mailbox>()?)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .header(XPriority(email.priority));
        for recipient in &email.recipients {
            builder = builder.to(recipient.parse::<Mailbox>()?);
        }
        let message = builder.body(email.html.clone())?;

        let transport = SmtpTransport::starttls_relay(&self.host)?
            .port(self.port)
            .credentials(Credentials::new(self.user.clone(), self.password.clone()))
            .build();
        transport.send(&message)?;
        Ok(())
    }
}

fn html(title: &str, body: &str) -> String {
    render(EMAIL_TEMPLATE, &[("title", title), ("body", body)])
}

/// Email listing the SQL updates for a run, for the bioinformatics team only
pub fn sql_email(run: &CollectRunfolderSamples, config: &Config) -> Option<Email> {
    let queries = run.queries(config);
    if queries.is_empty() {
        return None;
    }

    let body = format!(
        "<p>Please update the LIMS with the following queries:</p>\n<pre>\n{}\n</pre>",
        queries.join("\n")
    );
    Some(Email {
        subject: format!("{} SQL queries", run.runfolder_name),
        recipients: vec![config.email.bioinformatics_recipient.clone()],
        html: html("SQL queries", &body),
        priority: config.email.priority,
    })
}

/// Email announcing the samples being processed
pub fn samples_email(run: &CollectRunfolderSamples, config: &Config) -> Email {
    let mut recipients = vec![config.email.bioinformatics_recipient.clone()];
    match run.pipeline {
        Pipeline::Wes => recipients.push(config.email.wes_samplenames_recipient.clone()),
        Pipeline::Tso500 | Pipeline::Archerdx => {
            recipients.push(config.email.oncology_ops_recipient.clone())
        }
        _ => {}
    }

    let names = run.sample_names();
    let body = format!(
        "<p>Runfolder: {}</p>\n<p>Pipeline: {}</p>\n<p>Number of samples: {}</p>\n<ul>\n{}\n</ul>",
        run.runfolder_name,
        run.pipeline,
        names.len(),
        names
            .iter()
            .map(|name| format!("<li>{}</li>", name))
            .collect::<Vec<_>>()
            .join("\n")
    );

    Email {
        subject: format!(
            "{} being processed using {} pipeline",
            run.runfolder_name, run.pipeline
        ),
        recipients,
        html: html("Samples being processed", &body),
        priority: config.email.priority,
    }
}

/// Send both run emails. Failures are logged and never propagate.
pub fn send_pipeline_emails(
    run: &CollectRunfolderSamples,
    config: &Config,
    mailer: &dyn Mailer,
    logger: &AdLogger,
) -> usize {
    let emails: Vec<Email> = sql_email(run, config)
        .into_iter()
        .chain(std::iter::once(samples_email(run, config)))
        .collect();

    let mut sent = 0;
    for email in &emails {
        match mailer.send(email) {
            Ok(()) => {
                logger.info(format!(
                    "Sent email '{}' to {}",
                    email.subject,
                    email.recipients.join(", ")
                ));
                sent += 1;
            }
            Err(e) => logger.error(format!("Could not send email '{}': {}", email.subject, e)),
        }
    }
    sent
}
