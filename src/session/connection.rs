//! A single live XMPP connection: transport, auth, MUC join, and the
//! stanza-level protocol (ping/pong, service-unavailable fallback).
//!
//! `Connection` is 1:1 with an underlying `tokio_xmpp::SimpleClient`. It
//! knows nothing about reconnection or backoff — that's [`super::run`]'s
//! job. Adapted from the original `willglynn-nwws-oi` `Connection` type,
//! extended with the ping/pong bookkeeping and a richer returned event so
//! the session loop can drive the statistics aggregator and the ingest
//! path from one place.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::TryStreamExt;
use log::{debug, log_enabled, trace, warn, Level};

use crate::config::Config;
use crate::error::{Error, Result};

/// Something `Connection::next_event` hands back to the session loop.
pub(crate) enum ConnEvent {
    /// Any `<message>` stanza. `groupchat` carries the `<x>` text and the
    /// `<body>` text when the stanza is a groupchat message with an `<x>`
    /// payload attached.
    Message {
        groupchat: Option<GroupchatPayload>,
    },
    /// An `iq type="result"` matched an outstanding ping id.
    Pong,
}

pub(crate) struct GroupchatPayload {
    pub x_text: String,
    pub subject: String,
}

pub(crate) struct Connection {
    client: tokio_xmpp::SimpleClient,
    leave_message: xmpp_parsers::Element,
    server_host: String,
    outstanding_pings: HashSet<String>,
    last_message_at: Instant,
    last_groupchat_message_at: Instant,
}

impl Connection {
    /// Connects, authenticates, and joins the configured MUC room with the
    /// double-presence join spec.md §4.3.2 describes. Returns once the
    /// second presence has been sent and the self-presence confirmation
    /// has been observed.
    pub(crate) async fn new(config: &Config) -> Result<Self> {
        let jid = config.jid();
        let nickname = Utc::now().format("%Y%m%d%H%M").to_string();

        debug!("connecting to {}", config.server.hostname());
        let mut client = tokio_xmpp::SimpleClient::new(&jid, config.password.clone())
            .await
            .map_err(|e| match e {
                tokio_xmpp::Error::JidParse(_) => Error::Configuration(e),
                tokio_xmpp::Error::Auth(_) => Error::Credentials(e),
                _ => Error::Network(e),
            })?;
        let bound_jid = client.bound_jid().clone();
        debug!("connected as {}", &bound_jid);

        let room_jid = config.room.jid(nickname);
        let join_message =
            xmpp_parsers::presence::Presence::new(xmpp_parsers::presence::Type::None)
                .with_from(bound_jid.clone())
                .with_to(room_jid.clone())
                .with_payloads(vec![xmpp_parsers::muc::Muc {
                    password: None,
                    history: Some(xmpp_parsers::muc::muc::History {
                        maxchars: None,
                        maxstanzas: None,
                        seconds: Some(300),
                        since: None,
                    },
                )}
                .into()]);

        let leave_message =
            xmpp_parsers::presence::Presence::new(xmpp_parsers::presence::Type::Unavailable)
                .with_from(bound_jid.clone())
                .with_to(room_jid.clone())
                .with_payloads(vec![xmpp_parsers::muc::Muc {
                    password: None,
                    history: None,
                }
                .into()]);

        client.send_stanza(join_message.clone()).await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        client.send_stanza(join_message).await?;

        loop {
            let item = client.try_next().await?.ok_or(Error::StreamEnded)?;
            if let Ok(presence) = xmpp_parsers::presence::Presence::try_from(item) {
                for payload in presence.payloads {
                    if let Ok(muc_user) = xmpp_parsers::muc::MucUser::try_from(payload) {
                        if muc_user
                            .status
                            .iter()
                            .any(|s| s == &xmpp_parsers::muc::user::Status::SelfPresence)
                        {
                            let now = Instant::now();
                            return Ok(Self {
                                client,
                                leave_message,
                                server_host: config.server.hostname().to_string(),
                                outstanding_pings: HashSet::new(),
                                last_message_at: now,
                                last_groupchat_message_at: now,
                            });
                        }
                    }
                }
            }
        }
    }

    /// How long it has been since the last `<message>` of any kind.
    pub(crate) fn last_message_age(&self) -> Duration {
        self.last_message_at.elapsed()
    }

    /// How long it has been since the last groupchat message carrying `<x>`.
    pub(crate) fn last_groupchat_message_age(&self) -> Duration {
        self.last_groupchat_message_at.elapsed()
    }

    pub(crate) fn outstanding_ping_count(&self) -> usize {
        self.outstanding_pings.len()
    }

    /// Sends the housekeeping ping IQ (spec.md §4.3.3).
    pub(crate) async fn send_ping(&mut self) -> Result<()> {
        let id = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let ping = xmpp_parsers::Element::builder("ping", "urn:xmpp:ping").build();
        let stanza = xmpp_parsers::iq::Iq {
            from: None,
            to: Some(jid::Jid::from_str(&self.server_host).map_err(|_| Error::StreamEnded)?),
            id: id.clone(),
            payload: xmpp_parsers::iq::IqType::Get(ping),
        };
        self.client.send_stanza(stanza).await?;
        self.outstanding_pings.insert(id);
        Ok(())
    }

    /// Reads stanzas until one of them is reportable to the session loop:
    /// a `<message>`, or a pong matching an outstanding ping id. Everything
    /// else (presence chatter, ping requests, unknown IQs) is handled
    /// internally.
    pub(crate) async fn next_event(&mut self) -> Result<ConnEvent> {
        loop {
            let element = self.client.next().await.ok_or(Error::StreamEnded)??;

            if log_enabled!(Level::Trace) {
                let mut xml = Vec::new();
                element
                    .write_to(&mut std::io::Cursor::new(&mut xml))
                    .expect("encode");
                trace!("received: {}", String::from_utf8_lossy(&xml));
            }

            if element.is("message", "jabber:client") {
                self.last_message_at = Instant::now();

                let groupchat = self.groupchat_payload(&element);
                if groupchat.is_some() {
                    self.last_groupchat_message_at = Instant::now();
                }
                return Ok(ConnEvent::Message { groupchat });
            } else if element.is("iq", "jabber:client") {
                let iq = xmpp_parsers::iq::Iq::try_from(element)?;
                if let Some(event) = self.handle_iq(iq).await? {
                    return Ok(event);
                }
            } else if element.is("presence", "jabber:client") {
                trace!("presence: {:?}", element);
            } else {
                warn!("unhandled stanza: {:?}", element);
            }
        }
    }

    fn groupchat_payload(&self, element: &xmpp_parsers::Element) -> Option<GroupchatPayload> {
        let message = xmpp_parsers::message::Message::try_from(element.clone()).ok()?;
        if message.type_ != xmpp_parsers::message::MessageType::Groupchat {
            return None;
        }
        let x = message.payloads.iter().find(|p| p.is("x", "nwws-oi"))?;
        let subject = message
            .bodies
            .values()
            .next()
            .map(|b| b.0.clone())
            .unwrap_or_default();
        Some(GroupchatPayload {
            x_text: x.text(),
            subject,
        })
    }

    async fn handle_iq(&mut self, iq: xmpp_parsers::iq::Iq) -> Result<Option<ConnEvent>> {
        match iq.payload {
            xmpp_parsers::iq::IqType::Result(_) => {
                if self.outstanding_pings.remove(&iq.id) {
                    return Ok(Some(ConnEvent::Pong));
                }
            }
            xmpp_parsers::iq::IqType::Get(ref payload)
                if payload.is("ping", "urn:xmpp:ping") =>
            {
                let stanza = xmpp_parsers::iq::Iq {
                    from: iq.to,
                    to: iq.from,
                    id: iq.id,
                    payload: xmpp_parsers::iq::IqType::Result(None),
                };
                self.client.send_stanza(stanza).await?;
            }
            xmpp_parsers::iq::IqType::Get(_) | xmpp_parsers::iq::IqType::Set(_) => {
                let stanza = xmpp_parsers::iq::Iq {
                    from: iq.to,
                    to: iq.from,
                    id: iq.id,
                    payload: xmpp_parsers::iq::IqType::Error(
                        xmpp_parsers::stanza_error::StanzaError {
                            type_: xmpp_parsers::stanza_error::ErrorType::Cancel,
                            by: None,
                            defined_condition:
                                xmpp_parsers::stanza_error::DefinedCondition::ServiceUnavailable,
                            texts: Default::default(),
                            other: None,
                        },
                    ),
                };
                self.client.send_stanza(stanza).await?;
            }
            _ => {}
        }
        Ok(None)
    }

    /// Best-effort graceful close: leave presence, then end the stream.
    pub(crate) async fn end(self) {
        let mut client = self.client;
        client.send_stanza(self.leave_message).await.ok();
        client.end().await.ok();
    }
}
