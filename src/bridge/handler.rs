//! JSON-lines session handler
//!
//! Applies inbound host-state updates to the [`MemoryHost`], forwards the
//! matching [`HostEvent`] through the coordinator queue and writes verdicts,
//! command replies, phase changes and host effects back out.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::coordinator::{HostEvent, QueuedEvent};
use crate::game::guards::EventVerdict;
use crate::game::phase::TransitionCause;
use crate::game::rules::BorderCommand;
use crate::host::memory::MemoryHost;
use crate::host::HostEffect;

use super::protocol::{InboundMsg, OutboundMsg};

/// Everything a bridge session needs
#[derive(Clone)]
pub struct BridgeContext {
    pub state: AppState,
    pub host: Arc<MemoryHost>,
    pub events: mpsc::Sender<QueuedEvent>,
}

/// Bridge errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Bridge I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode bridge message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event coordinator is not running")]
    CoordinatorClosed,
}

/// Run a session until the reader hits end of input. Returns the writer.
///
/// `effects` should be subscribed before the [`AppState`] is built so that
/// startup effects are forwarded too.
pub async fn run_bridge<R, W>(
    ctx: BridgeContext,
    mut effects: broadcast::Receiver<HostEffect>,
    reader: R,
    mut writer: W,
) -> Result<W, BridgeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("Bridge session started");
    let mut lines = reader.lines();
    let mut changes = ctx.state.phase.changes();

    loop {
        tokio::select! {
            // Report phase changes, then effects, before reading the next line
            biased;

            change = changes.recv() => match change {
                Ok(change) => send_msg(&mut writer, &OutboundMsg::from(&change)).await?,
                Err(RecvError::Lagged(n)) => {
                    warn!(lagged_count = n, "Phase change receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },

            effect = effects.recv() => match effect {
                Ok(effect) => send_msg(&mut writer, &OutboundMsg::Effect { effect }).await?,
                Err(RecvError::Lagged(n)) => {
                    warn!(lagged_count = n, "Host effect receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },

            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Bridge input closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let reply = match serde_json::from_str::<InboundMsg>(line) {
                    Ok(msg) => handle_msg(&ctx, msg).await?,
                    Err(e) => {
                        warn!(error = %e, "Failed to parse bridge message");
                        Some(OutboundMsg::error("bad_message", e))
                    }
                };
                if let Some(reply) = reply {
                    send_msg(&mut writer, &reply).await?;
                }
            }
        }
    }

    loop {
        match changes.try_recv() {
            Ok(change) => send_msg(&mut writer, &OutboundMsg::from(&change)).await?,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    loop {
        match effects.try_recv() {
            Ok(effect) => send_msg(&mut writer, &OutboundMsg::Effect { effect }).await?,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    info!("Bridge session closed");
    Ok(writer)
}

async fn handle_msg(
    ctx: &BridgeContext,
    msg: InboundMsg,
) -> Result<Option<OutboundMsg>, BridgeError> {
    let host = &ctx.host;
    let event = match msg {
        InboundMsg::AddWorld {
            world,
            dimension,
            coordinate_scale,
        } => {
            if !(coordinate_scale.is_finite() && coordinate_scale > 0.0) {
                warn!(world = %world, coordinate_scale, "Rejected world with bad coordinate scale");
                return Ok(Some(OutboundMsg::error(
                    "world_rejected",
                    format!("Coordinate scale must be a positive number, got {coordinate_scale}"),
                )));
            }
            host.add_world(world, dimension, coordinate_scale);
            return Ok(None);
        }
        InboundMsg::UnloadWorld { world } => {
            host.unload_world(&world);
            HostEvent::WorldUnload { world }
        }
        InboundMsg::Join {
            entity,
            location,
            team,
            game_master,
        } => {
            host.join(entity, location);
            host.set_team(entity, team);
            host.set_game_master(entity, game_master);
            HostEvent::Join { entity }
        }
        InboundMsg::Quit { entity } => {
            host.disconnect(entity);
            HostEvent::Quit { entity }
        }
        InboundMsg::SetTeam { entity, team } => {
            host.set_team(entity, team);
            HostEvent::TeamChange { entity }
        }
        InboundMsg::Move { entity, to } => {
            host.move_to(entity, to.clone());
            HostEvent::Move { entity, to }
        }
        InboundMsg::Death { entity } => {
            host.mark_dead(entity);
            HostEvent::Death { entity }
        }
        InboundMsg::Respawn { entity, location } => {
            host.respawn(entity, location);
            HostEvent::Respawn { entity }
        }
        InboundMsg::WorldChange { entity, location } => {
            host.move_to(entity, location);
            HostEvent::WorldChange { entity }
        }
        InboundMsg::Portal {
            entity,
            destination,
        } => HostEvent::PortalAttempt {
            entity,
            destination,
        },
        InboundMsg::ProjectileHit { origin, location } => {
            HostEvent::ProjectileHit { origin, location }
        }
        InboundMsg::Explosion { origin, location } => HostEvent::Explosion { origin, location },
        InboundMsg::Piston { location } => HostEvent::PistonMove { piston: location },
        InboundMsg::Transition { delay_secs } => return Ok(transition(ctx, delay_secs)),
        InboundMsg::CancelTransition => {
            let reply = if ctx.state.phase.cancel_scheduled().await {
                OutboundMsg::TransitionCancelled {
                    state: ctx.state.phase.current_phase(),
                }
            } else {
                OutboundMsg::error("transition_rejected", "No transition is scheduled")
            };
            return Ok(Some(reply));
        }
        InboundMsg::SetState { state } => {
            return Ok(ctx
                .state
                .phase
                .set_phase(state)
                .err()
                .map(|e| OutboundMsg::error("transition_rejected", e)));
        }
        InboundMsg::GetState => {
            return Ok(Some(OutboundMsg::State {
                state: ctx.state.phase.current_phase(),
            }));
        }
        InboundMsg::Border { args } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let reply = match BorderCommand::parse(&args)
                .and_then(|command| ctx.state.world_rules.border_command(&command))
            {
                Ok(lines) => OutboundMsg::Border { lines },
                Err(e) => OutboundMsg::error("border_rejected", e),
            };
            return Ok(Some(reply));
        }
    };

    let cancellable = matches!(
        event,
        HostEvent::PortalAttempt { .. }
            | HostEvent::ProjectileHit { .. }
            | HostEvent::Explosion { .. }
            | HostEvent::PistonMove { .. }
    );
    let verdict = dispatch(ctx, event).await?;
    Ok(cancellable.then_some(OutboundMsg::Verdict { verdict }))
}

fn transition(ctx: &BridgeContext, delay_secs: Option<u64>) -> Option<OutboundMsg> {
    let phase = &ctx.state.phase;
    match delay_secs {
        Some(secs) if secs > 0 => {
            let from = phase.current_phase();
            let announcer = ctx.state.host.announcer.clone();
            match phase.schedule_transition(Duration::from_secs(secs), announcer) {
                Ok(()) => Some(OutboundMsg::TransitionScheduled {
                    from,
                    delay_secs: secs,
                }),
                Err(e) => Some(OutboundMsg::error("transition_rejected", e)),
            }
        }
        _ => phase
            .advance(TransitionCause::Command)
            .err()
            .map(|e| OutboundMsg::error("transition_rejected", e)),
    }
}

/// Queue an event and wait until the coordinator has handled it
async fn dispatch(ctx: &BridgeContext, event: HostEvent) -> Result<EventVerdict, BridgeError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    ctx.events
        .send(QueuedEvent {
            event,
            reply: Some(reply_tx),
        })
        .await
        .map_err(|_| BridgeError::CoordinatorClosed)?;
    reply_rx.await.map_err(|_| BridgeError::CoordinatorClosed)
}

/// Write one message as a JSON line
async fn send_msg<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &OutboundMsg,
) -> Result<(), BridgeError> {
    let mut json = serde_json::to_string(msg)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::phase::MatchPhase;
    use crate::game::quadrant::Quadrant;
    use crate::host::{EntityId, GameMode, Host, WorldKey, WorldService};
    use crate::store::MemoryPhaseStore;

    const NE_PLAYER: &str = "00000000-0000-0000-0000-00000000000a";
    const SW_PLAYER: &str = "00000000-0000-0000-0000-00000000000b";

    async fn session(start: MatchPhase, input: &str) -> Vec<OutboundMsg> {
        session_on(Arc::new(MemoryHost::new()), start, input).await
    }

    async fn session_on(
        host: Arc<MemoryHost>,
        start: MatchPhase,
        input: &str,
    ) -> Vec<OutboundMsg> {
        let effects = host.effects();
        let state = AppState::new(
            Config::default(),
            Host::from_shared(host.clone()),
            Arc::new(MemoryPhaseStore::with_phase(start)),
        );
        let (events, rx) = mpsc::channel(16);
        let coordinator = tokio::spawn(state.coordinator.clone().run(rx));

        let ctx = BridgeContext {
            state,
            host,
            events,
        };
        let output = run_bridge(ctx, effects, input.as_bytes(), Vec::new())
            .await
            .unwrap();
        coordinator.abort();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Everything except host effects
    fn replies(out: Vec<OutboundMsg>) -> Vec<OutboundMsg> {
        out.into_iter()
            .filter(|msg| !matches!(msg, OutboundMsg::Effect { .. }))
            .collect()
    }

    fn effects(out: &[OutboundMsg]) -> Vec<HostEffect> {
        out.iter()
            .filter_map(|msg| match msg {
                OutboundMsg::Effect { effect } => Some(effect.clone()),
                _ => None,
            })
            .collect()
    }

    fn join(entity: &str, team: &str, x: f64, z: f64) -> String {
        format!(
            r#"{{"type":"join","entity":"{entity}","team":"{team}","location":{{"world":"minecraft:overworld","x":{x},"y":64.0,"z":{z}}}}}"#
        )
    }

    #[tokio::test]
    async fn full_match_over_the_bridge() {
        let input = [
            join(NE_PLAYER, "NE", 300.0, 300.0),
            join(SW_PLAYER, "SW", -300.0, -300.0),
            r#"{"type":"transition"}"#.to_string(),
            r#"{"type":"get_state"}"#.to_string(),
            r#"{"type":"piston","location":{"world":"minecraft:overworld","x":10.0,"y":64.0,"z":10.0}}"#.to_string(),
            r#"{"type":"set_state","state":"BATTLE"}"#.to_string(),
            format!(r#"{{"type":"death","entity":"{SW_PLAYER}"}}"#),
            r#"{"type":"border","args":["get"]}"#.to_string(),
        ]
        .join("\n");

        let out = replies(session(MatchPhase::Pregame, &input).await);

        assert_eq!(
            out,
            vec![
                OutboundMsg::PhaseChanged {
                    from: MatchPhase::Pregame,
                    to: MatchPhase::Prep,
                    cause: TransitionCause::Command,
                },
                OutboundMsg::State {
                    state: MatchPhase::Prep
                },
                OutboundMsg::Verdict {
                    verdict: EventVerdict::Cancel
                },
                OutboundMsg::PhaseChanged {
                    from: MatchPhase::Prep,
                    to: MatchPhase::Battle,
                    cause: TransitionCause::Override,
                },
                OutboundMsg::PhaseChanged {
                    from: MatchPhase::Battle,
                    to: MatchPhase::PostGame,
                    cause: TransitionCause::LastTeamStanding,
                },
                OutboundMsg::error(
                    "border_rejected",
                    "World border can only be changed during the battle phase."
                ),
            ]
        );
    }

    #[tokio::test]
    async fn bad_lines_are_reported_and_skipped() {
        let input = "not json\n\n{\"type\":\"get_state\"}\n";
        let out = replies(session(MatchPhase::Battle, input).await);
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], OutboundMsg::Error { code, .. } if code == "bad_message"));
        assert_eq!(
            out[1],
            OutboundMsg::State {
                state: MatchPhase::Battle
            }
        );
    }

    #[tokio::test]
    async fn win_only_battle_refuses_manual_transition() {
        let input = "{\"type\":\"transition\"}\n{\"type\":\"transition\",\"delay_secs\":30}\n";
        let out = replies(session(MatchPhase::Battle, input).await);
        assert_eq!(
            out,
            vec![
                OutboundMsg::error(
                    "transition_rejected",
                    "Battle phase ends when only one team is left alive"
                ),
                OutboundMsg::error(
                    "transition_rejected",
                    "Battle phase ends when only one team is left alive"
                ),
            ]
        );
    }

    #[tokio::test]
    async fn countdown_blocks_other_transitions() {
        let input = "{\"type\":\"transition\",\"delay_secs\":30}\n{\"type\":\"transition\"}\n";
        let out = replies(session(MatchPhase::Pregame, input).await);
        assert_eq!(
            out,
            vec![
                OutboundMsg::TransitionScheduled {
                    from: MatchPhase::Pregame,
                    delay_secs: 30
                },
                OutboundMsg::error("transition_rejected", "A transition is already in progress"),
            ]
        );
    }

    #[tokio::test]
    async fn host_effects_reach_the_writer() {
        let input = [
            join(NE_PLAYER, "NE", 300.0, 300.0),
            join(SW_PLAYER, "SW", -300.0, -300.0),
            r#"{"type":"transition"}"#.to_string(),
            r#"{"type":"set_state","state":"BATTLE"}"#.to_string(),
            format!(r#"{{"type":"death","entity":"{SW_PLAYER}"}}"#),
        ]
        .join("\n");

        let out = session(MatchPhase::Pregame, &input).await;
        let seen = effects(&out);
        let ne: EntityId = NE_PLAYER.parse().unwrap();
        let sw: EntityId = SW_PLAYER.parse().unwrap();

        assert!(seen.iter().any(|e| match e {
            HostEffect::Boundary {
                entity,
                boundary: Some(b),
            } => *entity == ne && b.quadrant == Quadrant::NE,
            _ => false,
        }));
        assert!(seen.contains(&HostEffect::Boundary {
            entity: ne,
            boundary: None
        }));
        assert!(seen.contains(&HostEffect::GameMode {
            entity: sw,
            mode: GameMode::Spectator
        }));
        assert!(seen.contains(&HostEffect::Broadcast {
            message: "Team NE has won!".into()
        }));

        // Effects of a line are written before the next line is handled
        let to_battle = out
            .iter()
            .position(|m| matches!(m, OutboundMsg::PhaseChanged { to: MatchPhase::Battle, .. }))
            .unwrap();
        let cleared = out
            .iter()
            .position(|m| {
                *m == OutboundMsg::Effect {
                    effect: HostEffect::Boundary {
                        entity: ne,
                        boundary: None,
                    },
                }
            })
            .unwrap();
        let spectator = out
            .iter()
            .position(|m| {
                *m == OutboundMsg::Effect {
                    effect: HostEffect::GameMode {
                        entity: sw,
                        mode: GameMode::Spectator,
                    },
                }
            })
            .unwrap();
        assert!(to_battle < spectator);
        assert!(cleared < spectator);
    }

    #[tokio::test]
    async fn countdown_can_be_cancelled_then_overridden() {
        let input = [
            r#"{"type":"transition","delay_secs":30}"#,
            r#"{"type":"set_state","state":"POST_GAME"}"#,
            r#"{"type":"cancel_transition"}"#,
            r#"{"type":"cancel_transition"}"#,
            r#"{"type":"set_state","state":"POST_GAME"}"#,
        ]
        .join("\n");

        let out = session(MatchPhase::Pregame, &input).await;
        assert!(effects(&out).contains(&HostEffect::HideProgress));
        assert_eq!(
            replies(out),
            vec![
                OutboundMsg::TransitionScheduled {
                    from: MatchPhase::Pregame,
                    delay_secs: 30
                },
                OutboundMsg::error("transition_rejected", "A transition is already in progress"),
                OutboundMsg::TransitionCancelled {
                    state: MatchPhase::Pregame
                },
                OutboundMsg::error("transition_rejected", "No transition is scheduled"),
                OutboundMsg::PhaseChanged {
                    from: MatchPhase::Pregame,
                    to: MatchPhase::PostGame,
                    cause: TransitionCause::Override,
                },
            ]
        );
    }

    #[tokio::test]
    async fn worlds_need_a_positive_scale() {
        let input = [
            r#"{"type":"add_world","world":"custom:flat","dimension":"overworld","coordinate_scale":0.0}"#,
            r#"{"type":"add_world","world":"custom:deep","dimension":"nether","coordinate_scale":-8.0}"#,
            r#"{"type":"add_world","world":"custom:deep","dimension":"nether","coordinate_scale":8.0}"#,
        ]
        .join("\n");

        let host = Arc::new(MemoryHost::new());
        let out = replies(session_on(host.clone(), MatchPhase::Pregame, &input).await);
        assert_eq!(out.len(), 2);
        assert!(out
            .iter()
            .all(|m| matches!(m, OutboundMsg::Error { code, .. } if code == "world_rejected")));
        assert_eq!(host.coordinate_scale_of(&WorldKey::new("custom:flat")), None);
        assert_eq!(host.coordinate_scale_of(&WorldKey::new("custom:deep")), Some(8.0));
    }
}
