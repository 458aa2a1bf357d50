//! Pointing, rate guiding and closed-loop tracking on top of a [`Scope`].
//!
//! All angles and rates are fractions of a full turn (and turns per
//! second). Slew completion is observed through the poller's slew-done
//! refreshes, so waiting on a goto resolves at the poll cadence, not the
//! instant the motors stop.

use std::time::{Duration, SystemTime};

use crate::{
    angle,
    aux::{CommandId, Message},
    session::{Axis, Error, Scope},
};

/// Where a moving target is and where it is about to be, in fractions of
/// a full turn. Ephemeris libraries plug in here; they own their own
/// timescale.
pub trait TargetProvider {
    /// Horizontal coordinates `(alt, azm)` right now.
    fn now(&mut self) -> (f64, f64);

    /// Predicted horizontal coordinates at `when`.
    fn at(&mut self, when: SystemTime) -> (f64, f64);
}

/// proportional gain of the tracking loop
const DEFAULT_TRACK_GAIN: f64 = 3.0;

/// the wire cannot express a rate of more than half a turn per second
const MAX_TRACK_RATE: f64 = 0.5;

/// how often a waiting goto re-checks the slew flags
const SLEW_POLL_INTERVAL: Duration = Duration::from_secs(1);

impl Scope {
    /// Fast slew to `(alt, azm)` and wait until both axes report done.
    pub async fn goto(&self, alt: f64, azm: f64) -> Result<(), Error> {
        self.start_goto(alt, azm, true).await?;
        self.wait_slew_done().await
    }

    /// Approach-speed slew, for the final leg onto a target.
    pub async fn goto_slow(&self, alt: f64, azm: f64) -> Result<(), Error> {
        self.start_goto(alt, azm, false).await?;
        self.wait_slew_done().await
    }

    /// Issue the goto on both axes without waiting for completion.
    pub async fn start_goto(&self, alt: f64, azm: f64, fast: bool) -> Result<(), Error> {
        let id = if fast {
            CommandId::MC_GOTO_FAST
        } else {
            CommandId::MC_GOTO_SLOW
        };
        let alt_bytes = angle::pack_fraction(alt)?;
        let azm_bytes = angle::pack_fraction(azm)?;

        {
            let mut state = self.state_mut();
            state.target_alt = alt;
            state.target_azm = azm;
            state.slew_alt_pending = true;
            state.slew_azm_pending = true;
        }

        self.send(Message::command(Axis::Alt.target(), id, alt_bytes.to_vec()))
            .await?;
        self.send(Message::command(Axis::Azm.target(), id, azm_bytes.to_vec()))
            .await
    }

    /// Wait until the mount has reported both axes done.
    pub async fn wait_slew_done(&self) -> Result<(), Error> {
        loop {
            let state = self.state();
            if !state.connected {
                return Err(Error::Closed);
            }
            if !state.slew_alt_pending && !state.slew_azm_pending {
                return Ok(());
            }
            tokio::time::sleep(SLEW_POLL_INTERVAL).await;
        }
    }

    /// Continuous rate command on one axis, in turns per second. The sign
    /// picks the opcode; the wire carries the magnitude.
    pub async fn set_axis_guide_rate(&self, axis: Axis, rate: f64) -> Result<(), Error> {
        let id = if rate < 0.0 {
            CommandId::MC_SET_NEG_GUIDERATE
        } else {
            CommandId::MC_SET_POS_GUIDERATE
        };
        let payload = angle::pack_fraction(rate.abs())?;

        if rate != 0.0 {
            self.state_mut().guiding = true;
        }
        self.send(Message::command(axis.target(), id, payload.to_vec()))
            .await
    }

    /// Rate both axes at once. Zero on both ends the guiding state.
    pub async fn guide(&self, alt_rate: f64, azm_rate: f64) -> Result<(), Error> {
        self.set_axis_guide_rate(Axis::Alt, alt_rate).await?;
        self.set_axis_guide_rate(Axis::Azm, azm_rate).await?;
        if alt_rate == 0.0 && azm_rate == 0.0 {
            self.state_mut().guiding = false;
        }
        Ok(())
    }

    /// Track a moving target: slew close (fast, then an approach-speed
    /// pass), then keep steering the guide rates toward where the provider
    /// says the target will be one period from now. Runs until the session
    /// goes away.
    pub async fn track<P>(&self, provider: &mut P, period: Duration) -> Result<(), Error>
    where
        P: TargetProvider,
    {
        self.track_with_gain(provider, period, DEFAULT_TRACK_GAIN).await
    }

    pub async fn track_with_gain<P>(
        &self,
        provider: &mut P,
        period: Duration,
        gain: f64,
    ) -> Result<(), Error>
    where
        P: TargetProvider,
    {
        let (alt, azm) = provider.now();
        self.goto(alt, azm).await?;
        // the target moved while we slewed; a slow pass closes the rest
        let (alt, azm) = provider.now();
        self.goto_slow(alt, azm).await?;

        while self.is_connected() {
            let (alt_rate, azm_rate) = self.tracking_rates(provider, period, gain);
            self.guide(alt_rate, azm_rate).await?;
            tokio::time::sleep(period).await;
        }
        Ok(())
    }

    /// Differential rates that close the gap to the provider's position
    /// one period ahead.
    fn tracking_rates<P>(&self, provider: &mut P, period: Duration, gain: f64) -> (f64, f64)
    where
        P: TargetProvider,
    {
        let (alt_next, azm_next) = provider.at(SystemTime::now() + period);
        let state = self.state();
        let dt = period.as_secs_f64();

        let alt_rate = gain * angle::wrap_delta(alt_next - state.alt) / dt;
        let azm_rate = gain * angle::wrap_delta(azm_next - state.azm) / dt;
        (clamp_rate(alt_rate), clamp_rate(azm_rate))
    }
}

fn clamp_rate(rate: f64) -> f64 {
    rate.clamp(-MAX_TRACK_RATE, MAX_TRACK_RATE)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use crate::{
        angle,
        aux::{CommandId, Message, TargetId},
        motion::TargetProvider,
        session::{
            Axis,
            tests::{FarEnd, wait_for},
        },
    };

    /// Rises at a constant rate, azimuth fixed.
    struct LinearTarget {
        epoch: SystemTime,
        alt0: f64,
        azm0: f64,
        alt_rate: f64,
    }

    impl LinearTarget {
        fn new(alt0: f64, azm0: f64, alt_rate: f64) -> Self {
            Self {
                epoch: SystemTime::now(),
                alt0,
                azm0,
                alt_rate,
            }
        }
    }

    impl TargetProvider for LinearTarget {
        fn now(&mut self) -> (f64, f64) {
            self.at(SystemTime::now())
        }

        fn at(&mut self, when: SystemTime) -> (f64, f64) {
            let elapsed = when
                .duration_since(self.epoch)
                .unwrap_or_default()
                .as_secs_f64();
            (self.alt0 + self.alt_rate * elapsed, self.azm0)
        }
    }

    fn slew_done(axis: TargetId) -> Message {
        Message::new(axis, TargetId::APP, CommandId::MC_SLEW_DONE, vec![0x01])
    }

    #[tokio::test(start_paused = true)]
    async fn it_selects_guide_rate_opcodes_by_sign() {
        let (scope, mut far) = FarEnd::session();

        scope.set_axis_guide_rate(Axis::Alt, 0.01).await.unwrap();
        let message = far
            .next_matching(|m| m.destination == TargetId::ALT && m.payload.len() == 3)
            .await;
        assert_eq!(message.id, CommandId::MC_SET_POS_GUIDERATE);
        assert_eq!(message.payload, angle::pack_fraction(0.01).unwrap());

        scope.set_axis_guide_rate(Axis::Azm, -0.01).await.unwrap();
        let message = far
            .next_matching(|m| m.destination == TargetId::AZM && m.payload.len() == 3)
            .await;
        assert_eq!(message.id, CommandId::MC_SET_NEG_GUIDERATE);
        // the wire carries the magnitude; the opcode carries the sign
        assert_eq!(message.payload, angle::pack_fraction(0.01).unwrap());

        assert!(scope.state().guiding);
        scope.guide(0.0, 0.0).await.unwrap();
        wait_for(&scope, |state| !state.guiding).await;
    }

    #[tokio::test(start_paused = true)]
    async fn goto_returns_once_both_axes_report_done() {
        let (scope, mut far) = FarEnd::session();

        let worker = {
            let scope = scope.clone();
            tokio::spawn(async move { scope.goto(0.1, 0.2).await })
        };

        let alt = far.next_matching(|m| m.id == CommandId::MC_GOTO_FAST).await;
        assert_eq!(alt.destination, TargetId::ALT);
        assert_eq!(alt.payload, [0x19, 0x99, 0x99]);
        let azm = far.next_matching(|m| m.id == CommandId::MC_GOTO_FAST).await;
        assert_eq!(azm.destination, TargetId::AZM);
        assert_eq!(azm.payload, [0x33, 0x33, 0x33]);

        // still slewing: only one axis has reported done
        assert!(!worker.is_finished());
        far.reply(slew_done(TargetId::ALT)).await;
        wait_for(&scope, |state| !state.slew_alt_pending).await;
        assert!(!worker.is_finished());
        assert!(scope.state().slew_azm_pending);

        far.reply(slew_done(TargetId::AZM)).await;
        worker.await.unwrap().unwrap();

        let state = scope.state();
        assert!(!state.slew_alt_pending && !state.slew_azm_pending);
        assert_eq!(state.target_alt, 0.1);
        assert_eq!(state.target_azm, 0.2);
    }

    #[tokio::test(start_paused = true)]
    async fn it_tracks_a_linear_target() {
        let (scope, mut far) = FarEnd::session();

        let alt_rate = 0.001;
        let gain = 3.0;
        // long period: the wall clock barely moves under a paused runtime,
        // so the rate error from real elapsed time stays well under 5%
        let period = Duration::from_secs(10);

        let worker = {
            let scope = scope.clone();
            tokio::spawn(async move {
                let mut provider = LinearTarget::new(0.0, 0.25, alt_rate);
                scope.track_with_gain(&mut provider, period, gain).await
            })
        };

        // acknowledge the fast and the approach slews
        for goto in [CommandId::MC_GOTO_FAST, CommandId::MC_GOTO_SLOW] {
            far.next_matching(|m| m.id == goto && m.destination == TargetId::ALT)
                .await;
            far.next_matching(|m| m.id == goto && m.destination == TargetId::AZM)
                .await;
            far.reply(slew_done(TargetId::ALT)).await;
            far.reply(slew_done(TargetId::AZM)).await;
        }

        // with the mount still reported at alt 0, the expected correction
        // rate is gain * target_rate
        let guide = far
            .next_matching(|m| {
                m.destination == TargetId::ALT && m.id == CommandId::MC_SET_POS_GUIDERATE
                    && m.payload.len() == 3 && m.payload != [0x00, 0x00, 0x00]
            })
            .await;
        let sent = angle::unpack_fraction([guide.payload[0], guide.payload[1], guide.payload[2]]);
        let expected = gain * alt_rate;
        assert!(
            (sent - expected).abs() < 0.05 * expected,
            "sent {sent}, expected {expected}"
        );

        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn it_clamps_tracking_rates() {
        let (scope, mut far) = FarEnd::session();

        let worker = {
            let scope = scope.clone();
            tokio::spawn(async move {
                // jumps 0.4 turns ahead instantly: raw correction would be
                // 12 turns/s at a 0.1 s period
                let mut provider = LinearTarget::new(0.4, 0.0, 0.0);
                scope
                    .track_with_gain(&mut provider, Duration::from_millis(100), 3.0)
                    .await
            })
        };

        for goto in [CommandId::MC_GOTO_FAST, CommandId::MC_GOTO_SLOW] {
            far.next_matching(|m| m.id == goto && m.destination == TargetId::AZM)
                .await;
            far.reply(slew_done(TargetId::ALT)).await;
            far.reply(slew_done(TargetId::AZM)).await;
        }

        let guide = far
            .next_matching(|m| {
                m.destination == TargetId::ALT && m.id == CommandId::MC_SET_POS_GUIDERATE
                    && m.payload.len() == 3 && m.payload != [0x00, 0x00, 0x00]
            })
            .await;
        let sent = angle::unpack_fraction([guide.payload[0], guide.payload[1], guide.payload[2]]);
        assert_eq!(sent, 0.5);

        worker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn it_rejects_unrepresentable_rates() {
        let (scope, _far) = FarEnd::session();
        assert!(scope.set_axis_guide_rate(Axis::Alt, 2.0).await.is_err());
    }
}
