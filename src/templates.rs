//! Email rendering for the three email tiers.
//!
//! Templates are Handlebars strings registered once at startup; all
//! interpolated values are HTML-escaped by the engine.

use anyhow::{Error, Result, anyhow};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use crate::models::notification::{Priority, QueueEnvelope};

const SINGLE_TEMPLATE: &str = "single";
const BATCH_TEMPLATE: &str = "batch";
const DIGEST_TEMPLATE: &str = "digest";

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

#[derive(Serialize)]
struct ItemView<'a> {
    title: &'a str,
    message: Option<&'a str>,
    icon: &'static str,
    color: &'static str,
    received_at: String,
}

#[derive(Serialize)]
struct SingleView<'a> {
    item: ItemView<'a>,
    high_priority: bool,
}

#[derive(Serialize)]
struct BatchView<'a> {
    count: usize,
    plural: &'static str,
    items: Vec<ItemView<'a>>,
}

#[derive(Serialize)]
struct GroupView<'a> {
    notification_type: &'a str,
    icon: &'static str,
    color: &'static str,
    count: usize,
    items: Vec<ItemView<'a>>,
}

#[derive(Serialize)]
struct DigestView<'a> {
    count: usize,
    plural: &'static str,
    groups: Vec<GroupView<'a>>,
}

pub fn icon_for(notification_type: &str) -> &'static str {
    match notification_type {
        "comment" => "💬",
        "like" => "❤️",
        "mention" => "🔔",
        "follow" => "👤",
        _ => "🔔",
    }
}

pub fn color_for(notification_type: &str) -> &'static str {
    match notification_type {
        "comment" => "#3b82f6",
        "like" => "#ef4444",
        "mention" => "#f59e0b",
        "follow" => "#8b5cf6",
        _ => "#667eea",
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn item_view(envelope: &QueueEnvelope) -> ItemView<'_> {
    ItemView {
        title: &envelope.title,
        message: envelope.message.as_deref().filter(|m| !m.is_empty()),
        icon: icon_for(&envelope.notification_type),
        color: color_for(&envelope.notification_type),
        received_at: envelope.enqueued_at.format("%b %-d, %Y %H:%M UTC").to_string(),
    }
}

pub struct EmailTemplates {
    handlebars: Handlebars<'static>,
}

impl EmailTemplates {
    pub fn new() -> Result<Self, Error> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);

        handlebars
            .register_template_string(SINGLE_TEMPLATE, SINGLE_HTML)
            .map_err(|e| anyhow!("Failed to register {} template: {}", SINGLE_TEMPLATE, e))?;
        handlebars
            .register_template_string(BATCH_TEMPLATE, BATCH_HTML)
            .map_err(|e| anyhow!("Failed to register {} template: {}", BATCH_TEMPLATE, e))?;
        handlebars
            .register_template_string(DIGEST_TEMPLATE, DIGEST_HTML)
            .map_err(|e| anyhow!("Failed to register {} template: {}", DIGEST_TEMPLATE, e))?;

        Ok(Self { handlebars })
    }

    fn render<T: Serialize>(&self, name: &str, view: &T) -> Result<String, Error> {
        self.handlebars
            .render(name, view)
            .map_err(|e| anyhow!("Failed to render {} template: {}", name, e))
    }

    pub fn render_single(&self, envelope: &QueueEnvelope) -> Result<RenderedEmail, Error> {
        debug!(user_id = envelope.user_id, "Rendering single notification email");

        let view = SingleView {
            item: item_view(envelope),
            high_priority: envelope.priority == Priority::High,
        };

        Ok(RenderedEmail {
            subject: format!("🔔 {}", envelope.title),
            html: self.render(SINGLE_TEMPLATE, &view)?,
        })
    }

    /// Flat list, oldest first.
    pub fn render_batch(&self, envelopes: &[QueueEnvelope]) -> Result<RenderedEmail, Error> {
        let mut ordered: Vec<&QueueEnvelope> = envelopes.iter().collect();
        ordered.sort_by_key(|e| e.enqueued_at);

        let count = ordered.len();
        let view = BatchView {
            count,
            plural: plural(count),
            items: ordered.into_iter().map(item_view).collect(),
        };

        Ok(RenderedEmail {
            subject: format!("📬 You have {} new notification{}", count, plural(count)),
            html: self.render(BATCH_TEMPLATE, &view)?,
        })
    }

    /// Grouped by notification type, groups in order of first appearance.
    pub fn render_digest(&self, envelopes: &[QueueEnvelope]) -> Result<RenderedEmail, Error> {
        let mut groups: Vec<GroupView<'_>> = Vec::new();

        for envelope in envelopes {
            let item = item_view(envelope);
            match groups
                .iter_mut()
                .find(|g| g.notification_type == envelope.notification_type)
            {
                Some(group) => {
                    group.count += 1;
                    group.items.push(item);
                }
                None => groups.push(GroupView {
                    notification_type: &envelope.notification_type,
                    icon: icon_for(&envelope.notification_type),
                    color: color_for(&envelope.notification_type),
                    count: 1,
                    items: vec![item],
                }),
            }
        }

        let count = envelopes.len();
        let view = DigestView {
            count,
            plural: plural(count),
            groups,
        };

        Ok(RenderedEmail {
            subject: format!("📊 Your Daily Digest - {} notification{}", count, plural(count)),
            html: self.render(DIGEST_TEMPLATE, &view)?,
        })
    }
}

const SINGLE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1.0"></head>
<body style="margin:0;padding:0;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Arial,sans-serif;background-color:#f5f5f5;">
  <div style="max-width:600px;margin:40px auto;background:white;border-radius:12px;overflow:hidden;">
    <div style="background:linear-gradient(135deg,#667eea 0%,#764ba2 100%);padding:32px 24px;text-align:center;">
      <h1 style="margin:0;color:white;font-size:20px;">🔔 New Notification</h1>
    </div>
    <div style="padding:32px 24px;">
      <div style="background:#f9fafb;border-left:4px solid {{item.color}};border-radius:8px;padding:20px;">
        <div style="font-size:32px;margin-bottom:12px;">{{item.icon}}</div>
        <h2 style="font-size:18px;color:#1f2937;margin:0 0 8px 0;">{{item.title}}</h2>
        {{#if item.message}}<p style="font-size:15px;color:#6b7280;margin:0;">{{item.message}}</p>{{/if}}
        {{#if high_priority}}<span style="display:inline-block;padding:4px 10px;border-radius:12px;font-size:11px;margin-top:12px;background:#fee2e2;color:#991b1b;">High Priority</span>{{/if}}
      </div>
    </div>
    <div style="padding:24px;text-align:center;color:#9ca3af;font-size:13px;">
      <p>You're receiving this because you enabled email notifications.</p>
    </div>
  </div>
</body>
</html>"#;

const BATCH_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1.0"></head>
<body style="margin:0;padding:0;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Arial,sans-serif;background-color:#f5f5f5;">
  <div style="max-width:600px;margin:40px auto;background:white;border-radius:12px;overflow:hidden;">
    <div style="background:linear-gradient(135deg,#667eea 0%,#764ba2 100%);padding:32px 24px;text-align:center;">
      <h1 style="margin:0;color:white;font-size:20px;">📬 You have {{count}} new notification{{plural}}</h1>
      <p style="margin:8px 0 0 0;color:rgba(255,255,255,0.9);font-size:14px;">Here's what you missed</p>
    </div>
    <div style="padding:24px;background:#f9fafb;">
      {{#each items}}
      <div style="background:white;border-left:3px solid {{color}};border-radius:8px;padding:16px;margin-bottom:12px;">
        <div style="font-size:24px;">{{icon}}</div>
        <div style="font-weight:600;color:#1f2937;margin-bottom:4px;">{{title}}</div>
        {{#if message}}<div style="color:#6b7280;font-size:14px;">{{message}}</div>{{/if}}
        <div style="color:#9ca3af;font-size:12px;margin-top:6px;">{{received_at}}</div>
      </div>
      {{/each}}
    </div>
    <div style="padding:24px;text-align:center;color:#9ca3af;font-size:13px;background:white;">
      <p>You're receiving batched notifications.</p>
    </div>
  </div>
</body>
</html>"#;

const DIGEST_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width, initial-scale=1.0"></head>
<body style="margin:0;padding:0;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Arial,sans-serif;background-color:#f5f5f5;">
  <div style="max-width:600px;margin:40px auto;background:white;border-radius:12px;overflow:hidden;">
    <div style="background:linear-gradient(135deg,#667eea 0%,#764ba2 100%);padding:40px 24px;text-align:center;">
      <h1 style="margin:0;color:white;font-size:24px;">📊 Your Daily Digest</h1>
      <p style="margin:12px 0 0 0;color:rgba(255,255,255,0.9);font-size:15px;">{{count}} notification{{plural}} since your last digest</p>
    </div>
    <div style="padding:32px 24px;">
      {{#each groups}}
      <div style="margin-bottom:24px;">
        <div style="margin-bottom:12px;padding-bottom:8px;border-bottom:2px solid {{color}};">
          <span style="font-size:24px;">{{icon}}</span>
          <h3 style="margin:0;color:#1f2937;font-size:16px;text-transform:capitalize;">{{notification_type}} ({{count}})</h3>
        </div>
        {{#each items}}
        <div style="padding:12px 0;border-bottom:1px solid #f3f4f6;">
          <div style="font-weight:500;color:#374151;margin-bottom:4px;">{{title}}</div>
          {{#if message}}<div style="color:#6b7280;font-size:14px;">{{message}}</div>{{/if}}
        </div>
        {{/each}}
      </div>
      {{/each}}
    </div>
    <div style="padding:24px;text-align:center;color:#9ca3af;font-size:13px;background:#f9fafb;">
      <p>You're receiving a digest of low-priority notifications.</p>
    </div>
  </div>
</body>
</html>"#;
