//! Drawing synchronization engine.
//!
//! [`DrawSyncEngine`] turns local pointer motion into [`DrawEvent`]s, renders
//! them optimistically, broadcasts them through a [`ConnectionManager`] and
//! replays events from other participants onto the same canvas. Events that
//! carry the local participant id are the relay echoing our own strokes and
//! are never rendered twice.

use crate::canvas::{CanvasState, DisplayList, StrokeStyle, Surface};
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::protocol::{self, DrawEvent, ParticipantId, SessionId, StrokeSegment};
use crate::transport::{Transport, preview};
use kurbo::Point;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

/// Outcome of handling one inbound relay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Rendered onto the canvas.
    Applied,
    /// Our own event coming back from the relay; ignored.
    Echo,
    /// Could not be decoded; dropped.
    Malformed,
}

/// One participant's view of a shared drawing session.
pub struct DrawSyncEngine<T: Transport, S: Surface = DisplayList> {
    participant: ParticipantId,
    connection: ConnectionManager<T>,
    /// Raw bodies delivered by the connection, applied on the next pump.
    inbox: Rc<RefCell<VecDeque<String>>>,
    canvas: CanvasState<S>,
    style: StrokeStyle,
    erasing: bool,
}

impl<T: Transport, S: Surface> DrawSyncEngine<T, S> {
    /// Join `session` with a freshly generated participant id.
    pub fn new(session: SessionId, transport: T, surface: S, config: &SyncConfig) -> Self {
        Self::with_participant(ParticipantId::generate(), session, transport, surface, config)
    }

    /// Join `session` as a fixed participant.
    pub fn with_participant(
        participant: ParticipantId,
        session: SessionId,
        transport: T,
        surface: S,
        config: &SyncConfig,
    ) -> Self {
        Self::with_participant_at(participant, session, transport, surface, config, Instant::now())
    }

    /// [`Self::with_participant`] with an explicit start time.
    pub fn with_participant_at(
        participant: ParticipantId,
        session: SessionId,
        transport: T,
        surface: S,
        config: &SyncConfig,
        now: Instant,
    ) -> Self {
        let inbox = Rc::new(RefCell::new(VecDeque::new()));
        let sink = inbox.clone();
        let connection = ConnectionManager::create_at(
            move |body: &str| sink.borrow_mut().push_back(body.to_string()),
            session,
            transport,
            config.connection_options(),
            now,
        );
        log::info!("Participant {} joining {}", participant, connection.topic());

        Self {
            participant,
            connection,
            inbox,
            canvas: CanvasState::new(surface),
            style: config.stroke_style(),
            erasing: false,
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn session(&self) -> &SessionId {
        self.connection.session()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn canvas(&self) -> &CanvasState<S> {
        &self.canvas
    }

    pub fn surface(&self) -> &S {
        self.canvas.surface()
    }

    pub fn into_surface(self) -> S {
        self.canvas.into_surface()
    }

    pub fn style(&self) -> &StrokeStyle {
        &self.style
    }

    /// Change the pen. Applies to local and remote segments alike.
    pub fn set_style(&mut self, style: StrokeStyle) {
        self.style = style;
    }

    pub fn is_erasing(&self) -> bool {
        self.erasing
    }

    pub fn set_erasing(&mut self, erasing: bool) {
        self.erasing = erasing;
    }

    /// Switch between pen and eraser, returning the new mode.
    pub fn toggle_erasing(&mut self) -> bool {
        self.erasing = !self.erasing;
        self.erasing
    }

    /// Drive the connection and apply everything that arrived since the
    /// last pump.
    pub fn pump(&mut self) {
        self.pump_at(Instant::now());
    }

    /// [`Self::pump`] with an explicit current time.
    pub fn pump_at(&mut self, now: Instant) {
        self.connection.poll_at(now);
        loop {
            // Inbox borrow must end before the event is applied.
            let next = self.inbox.borrow_mut().pop_front();
            let Some(body) = next else { break };
            self.apply_inbound(&body);
        }
    }

    pub fn pointer_down(&mut self, position: Point) {
        self.canvas.gesture_mut().begin(position);
    }

    /// Sample the pointer. While a gesture is active this renders and
    /// broadcasts the segment from the previous sample to `position`.
    pub fn pointer_move(&mut self, position: Point) {
        let Some((prev, curr)) = self.canvas.gesture_mut().advance(position) else {
            return;
        };
        let segment = StrokeSegment {
            prev,
            curr,
            erase: self.erasing,
            sender: self.participant.clone(),
        };
        self.canvas.paint_segment(&segment, &self.style);
        self.broadcast(&DrawEvent::StrokeSegment(segment));
    }

    pub fn pointer_up(&mut self) {
        self.canvas.gesture_mut().end();
    }

    /// The pointer left the canvas. A held gesture continues once it comes
    /// back, but without a segment across the gap.
    pub fn pointer_leave(&mut self) {
        self.canvas.gesture_mut().leave();
    }

    /// Clear the local canvas and tell everyone else to do the same.
    pub fn clear_requested(&mut self) {
        self.canvas.clear();
        let event = DrawEvent::ClearBoard {
            sender: self.participant.clone(),
        };
        self.broadcast(&event);
    }

    /// Decode and apply one raw relay message.
    pub fn apply_inbound(&mut self, raw: &str) -> Inbound {
        let event = match protocol::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping malformed message: {} ({})", e, preview(raw));
                return Inbound::Malformed;
            }
        };
        if event.is_from(&self.participant) {
            return Inbound::Echo;
        }
        log::debug!("Applying event from {}", event.sender());
        self.canvas.apply(&event, &self.style);
        Inbound::Applied
    }

    /// Leave the session. The connection stops checking liveness and the
    /// canvas stays as it is.
    pub fn shutdown(&mut self) {
        log::info!("Participant {} leaving {}", self.participant, self.connection.topic());
        self.connection.stop();
        self.inbox.borrow_mut().clear();
    }

    fn broadcast(&mut self, event: &DrawEvent) {
        match protocol::encode(event) {
            Ok(body) => {
                self.connection.send_raw(&body);
            }
            Err(e) => log::warn!("Not broadcasting event: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{PaintOp, Rgba};
    use crate::raster::Raster;
    use crate::transport::{MemoryRelay, MemoryTransport};
    use std::time::Duration;

    type Engine<S = DisplayList> = DrawSyncEngine<MemoryTransport, S>;

    fn join<S: Surface>(relay: &MemoryRelay, id: &str, surface: S, now: Instant) -> Engine<S> {
        let mut engine = DrawSyncEngine::with_participant_at(
            ParticipantId::from(id),
            SessionId::new("room-9"),
            relay.transport(),
            surface,
            &SyncConfig::default(),
            now,
        );
        engine.pump_at(now);
        assert_eq!(engine.connection_state(), ConnectionState::Connected);
        engine
    }

    fn draw<S: Surface>(engine: &mut Engine<S>, from: Point, to: Point) {
        engine.pointer_down(from);
        engine.pointer_move(to);
        engine.pointer_up();
    }

    fn line(from: (f64, f64), to: (f64, f64)) -> PaintOp {
        PaintOp::Line {
            from: Point::new(from.0, from.1),
            to: Point::new(to.0, to.1),
            width: 1.0,
            color: Rgba::black(),
        }
    }

    #[test]
    fn test_stroke_reaches_peer_without_echo() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut a = join(&relay, "A1", DisplayList::new(), now);
        let mut b = join(&relay, "B2", DisplayList::new(), now);

        draw(&mut a, Point::new(10.0, 10.0), Point::new(20.0, 20.0));
        assert_eq!(a.surface().ops(), &[line((10.0, 10.0), (20.0, 20.0))]);

        let published = relay.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "/topic/room-9");
        let wire: serde_json::Value = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(
            wire,
            serde_json::json!({
                "senderId": "A1", "prevX": 10.0, "prevY": 10.0, "currX": 20.0, "currY": 20.0,
                "erase": false, "eraseBoard": false
            })
        );

        a.pump_at(now);
        b.pump_at(now);
        // A1 got its own message back and rendered nothing more.
        assert_eq!(a.surface().len(), 1);
        assert_eq!(b.surface(), a.surface());
    }

    #[test]
    fn test_stroke_rasterizes_on_peer() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut a = join(&relay, "A1", Raster::new(64, 64), now);
        let mut b = join(&relay, "B2", Raster::new(64, 64), now);

        draw(&mut a, Point::new(10.0, 10.0), Point::new(20.0, 20.0));
        b.pump_at(now);

        let pixel = b.surface().pixel(15, 15).unwrap();
        assert_eq!((pixel.r, pixel.g, pixel.b), (0, 0, 0));
        assert!(pixel.a > 0);
        assert_eq!(b.surface().pixel(40, 40).unwrap().a, 0);

        a.pump_at(now);
        assert_eq!(a.surface(), b.surface());
    }

    #[test]
    fn test_echo_is_not_reapplied() {
        let relay = MemoryRelay::new();
        let mut a = join(&relay, "A1", DisplayList::new(), Instant::now());
        let own = r#"{"senderId":"A1","prevX":0,"prevY":0,"currX":5,"currY":5,"erase":false,"eraseBoard":false}"#;
        let own_clear = r#"{"senderId":"A1","eraseBoard":true}"#;

        draw(&mut a, Point::new(1.0, 1.0), Point::new(2.0, 2.0));
        assert_eq!(a.apply_inbound(own), Inbound::Echo);
        assert_eq!(a.apply_inbound(own_clear), Inbound::Echo);
        assert_eq!(a.surface().len(), 1);
    }

    #[test]
    fn test_clear_propagates_and_is_idempotent() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut a = join(&relay, "A1", DisplayList::new(), now);
        let mut b = join(&relay, "B2", DisplayList::new(), now);

        draw(&mut b, Point::new(0.0, 0.0), Point::new(3.0, 4.0));
        a.pump_at(now);
        assert_eq!(a.surface().len(), 1);

        a.clear_requested();
        assert!(a.surface().is_empty());
        let clear = relay.published().last().map(|(_, body)| body.clone()).unwrap();
        let wire: serde_json::Value = serde_json::from_str(&clear).unwrap();
        assert_eq!(wire["senderId"], "A1");
        assert_eq!(wire["eraseBoard"], true);

        b.pump_at(now);
        assert!(b.surface().is_empty());

        let once = b.surface().clone();
        assert_eq!(b.apply_inbound(r#"{"senderId":"C3","eraseBoard":true}"#), Inbound::Applied);
        assert_eq!(b.apply_inbound(r#"{"senderId":"D4","eraseBoard":true}"#), Inbound::Applied);
        assert_eq!(*b.surface(), once);
    }

    #[test]
    fn test_late_joiner_does_not_replay_clear() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut a = join(&relay, "A1", DisplayList::new(), now);
        let mut b = join(&relay, "B2", DisplayList::new(), now);
        a.clear_requested();

        let mut c = join(&relay, "C3", DisplayList::new(), now);
        draw(&mut b, Point::new(0.0, 0.0), Point::new(1.0, 1.0));
        c.pump_at(now);
        // Only the stroke sent after C3 joined arrives; the earlier clear is gone.
        assert_eq!(c.surface().ops(), &[line((0.0, 0.0), (1.0, 1.0))]);
    }

    #[test]
    fn test_remote_stroke_applied_in_arrival_order() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut a = join(&relay, "A1", DisplayList::new(), now);
        let mut b = join(&relay, "B2", DisplayList::new(), now);

        a.pointer_down(Point::new(0.0, 0.0));
        a.pointer_move(Point::new(10.0, 0.0));
        a.pointer_move(Point::new(10.0, 10.0));
        a.pointer_move(Point::new(0.0, 10.0));
        a.pointer_up();
        b.pump_at(now);

        assert_eq!(
            b.surface().ops(),
            &[
                line((0.0, 0.0), (10.0, 0.0)),
                line((10.0, 0.0), (10.0, 10.0)),
                line((10.0, 10.0), (0.0, 10.0)),
            ]
        );
        assert_eq!(b.surface(), a.surface());
    }

    #[test]
    fn test_malformed_payload_leaves_canvas_unchanged() {
        let relay = MemoryRelay::new();
        let mut b = join(&relay, "B2", DisplayList::new(), Instant::now());
        draw(&mut b, Point::new(0.0, 0.0), Point::new(1.0, 1.0));
        let before = b.surface().clone();

        for raw in [
            "not json",
            r#"{"prevX":0,"prevY":0,"currX":1,"currY":1}"#,
            r#"{"senderId":"","eraseBoard":true}"#,
            r#"{"senderId":"A1","prevX":0,"currX":1,"currY":1}"#,
            r#"{"senderId":"A1","prevX":"x","prevY":0,"currX":1,"currY":1}"#,
        ] {
            assert_eq!(b.apply_inbound(raw), Inbound::Malformed, "{}", raw);
        }
        assert_eq!(*b.surface(), before);
    }

    #[test]
    fn test_draws_locally_while_disconnected() {
        let relay = MemoryRelay::new();
        relay.set_reachable(false);
        let now = Instant::now();
        let mut a: Engine = DrawSyncEngine::with_participant_at(
            ParticipantId::from("A1"),
            SessionId::new("room-9"),
            relay.transport(),
            DisplayList::new(),
            &SyncConfig::default(),
            now,
        );
        a.pump_at(now);
        assert_eq!(a.connection_state(), ConnectionState::Disconnected);

        draw(&mut a, Point::new(0.0, 0.0), Point::new(8.0, 8.0));
        assert_eq!(a.surface().len(), 1);
        assert_eq!(relay.publish_count(), 0);

        // Once the relay is back, only new strokes propagate.
        relay.set_reachable(true);
        a.pump_at(now + Duration::from_millis(2000));
        assert_eq!(a.connection_state(), ConnectionState::Connected);
        draw(&mut a, Point::new(8.0, 8.0), Point::new(9.0, 9.0));
        assert_eq!(relay.publish_count(), 1);
    }

    #[test]
    fn test_pointer_move_needs_active_gesture() {
        let relay = MemoryRelay::new();
        let mut a = join(&relay, "A1", DisplayList::new(), Instant::now());
        a.pointer_move(Point::new(5.0, 5.0));
        assert!(a.surface().is_empty());

        a.pointer_down(Point::new(0.0, 0.0));
        a.pointer_move(Point::new(1.0, 0.0));
        a.pointer_move(Point::new(2.0, 0.0));
        a.pointer_up();
        a.pointer_move(Point::new(3.0, 0.0));
        assert_eq!(
            a.surface().ops(),
            &[line((0.0, 0.0), (1.0, 0.0)), line((1.0, 0.0), (2.0, 0.0))]
        );
        assert_eq!(relay.publish_count(), 2);
    }

    #[test]
    fn test_leave_and_reenter_skips_gap() {
        let relay = MemoryRelay::new();
        let mut a = join(&relay, "A1", DisplayList::new(), Instant::now());
        a.pointer_down(Point::new(0.0, 0.0));
        a.pointer_move(Point::new(10.0, 0.0));
        a.pointer_leave();
        a.pointer_move(Point::new(300.0, 300.0));
        a.pointer_move(Point::new(301.0, 300.0));
        assert_eq!(
            a.surface().ops(),
            &[line((0.0, 0.0), (10.0, 0.0)), line((300.0, 300.0), (301.0, 300.0))]
        );
    }

    #[test]
    fn test_erase_mode_stamps_eraser() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut a = join(&relay, "A1", DisplayList::new(), now);
        let mut b = join(&relay, "B2", DisplayList::new(), now);

        assert!(a.toggle_erasing());
        draw(&mut a, Point::new(10.0, 10.0), Point::new(20.0, 20.0));
        b.pump_at(now);

        let expected = PaintOp::Erase { center: Point::new(20.0, 20.0), radius: 40.0 };
        assert_eq!(a.surface().ops(), &[expected.clone()]);
        assert_eq!(b.surface().ops(), &[expected]);

        a.set_erasing(false);
        assert!(!a.is_erasing());
    }

    #[test]
    fn test_erase_clears_raster_pixels() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut a = join(&relay, "A1", Raster::new(64, 64), now);
        let mut b = join(&relay, "B2", Raster::new(64, 64), now);

        draw(&mut a, Point::new(10.0, 10.0), Point::new(20.0, 20.0));
        a.set_erasing(true);
        draw(&mut a, Point::new(20.0, 20.0), Point::new(15.0, 15.0));
        b.pump_at(now);

        assert_eq!(a.surface().painted_pixels(), 0);
        assert_eq!(b.surface().painted_pixels(), 0);
    }

    #[test]
    fn test_remote_strokes_use_local_style() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut a = join(&relay, "A1", DisplayList::new(), now);
        let mut b = join(&relay, "B2", DisplayList::new(), now);
        let red = StrokeStyle {
            width: 4.0,
            color: Rgba::new(255, 0, 0, 255),
            ..StrokeStyle::default()
        };
        b.set_style(red);
        assert_eq!(*b.style(), red);

        draw(&mut a, Point::new(0.0, 0.0), Point::new(5.0, 5.0));
        b.pump_at(now);
        assert_eq!(
            b.surface().ops(),
            &[PaintOp::Line {
                from: Point::new(0.0, 0.0),
                to: Point::new(5.0, 5.0),
                width: 4.0,
                color: Rgba::new(255, 0, 0, 255),
            }]
        );
    }

    #[test]
    fn test_shutdown_stops_syncing() {
        let relay = MemoryRelay::new();
        let now = Instant::now();
        let mut a = join(&relay, "A1", DisplayList::new(), now);
        a.shutdown();
        assert_eq!(a.connection_state(), ConnectionState::Disconnected);
        assert!(!a.connection().heartbeat().is_running());

        draw(&mut a, Point::new(0.0, 0.0), Point::new(1.0, 1.0));
        a.pump_at(now + Duration::from_secs(60));
        assert_eq!(relay.publish_count(), 0);
        assert_eq!(relay.connect_attempts(), 1);
        assert_eq!(a.surface().len(), 1);
    }

    #[test]
    fn test_generated_participant_ids_differ() {
        let relay = MemoryRelay::new();
        let config = SyncConfig::default();
        let a: Engine = DrawSyncEngine::new(SessionId::new("room-9"), relay.transport(), DisplayList::new(), &config);
        let b: Engine = DrawSyncEngine::new(SessionId::new("room-9"), relay.transport(), DisplayList::new(), &config);
        assert_ne!(a.participant_id(), b.participant_id());
        assert_eq!(a.session().as_str(), "room-9");
    }
}
