//! Crank trigger wheel simulator.
//!
//! Produces tooth-edge timestamps for an N-1 wheel (one missing tooth) at a
//! commanded speed. Tooth 0 is the first tooth after the gap, so its edge is
//! the one that closes the double-width interval.

/// Edge generator for an N-1 trigger wheel.
#[derive(Debug, Clone)]
pub struct CrankWheel {
    teeth: u16,
    rpm: f32,
    next_tooth: u16,
    next_edge_us: f64,
}

impl CrankWheel {
    /// `teeth` counts the missing tooth too (36 for a 36-1 wheel).
    /// The first generated edge belongs to `start_tooth` at `start_us`.
    pub fn new(teeth: u16, rpm: f32, start_tooth: u16, start_us: u64) -> Self {
        let teeth = teeth.max(3);
        Self {
            teeth,
            rpm: rpm.max(1.0),
            next_tooth: start_tooth % (teeth - 1),
            next_edge_us: start_us as f64,
        }
    }

    /// Nominal spacing of two adjacent teeth at the current speed.
    pub fn tooth_period_us(&self) -> f64 {
        60_000_000.0 / f64::from(self.rpm) / f64::from(self.teeth)
    }

    pub fn rpm(&self) -> f32 {
        self.rpm
    }

    /// Change speed; takes effect from the edge after the next one.
    pub fn set_rpm(&mut self, rpm: f32) {
        self.rpm = rpm.max(1.0);
    }

    /// Timestamp of the edge that `advance` will return next.
    pub fn peek_next_edge_us(&self) -> u64 {
        self.next_edge_us.round() as u64
    }

    /// Tooth index of the next edge (0 closes the gap).
    pub fn next_tooth(&self) -> u16 {
        self.next_tooth
    }

    /// Emit the next edge and schedule the one after it.
    pub fn advance(&mut self) -> u64 {
        let t = self.peek_next_edge_us();
        let last_present = self.teeth - 2;
        let gap = if self.next_tooth == last_present { 2.0 } else { 1.0 };
        self.next_edge_us += gap * self.tooth_period_us();
        self.next_tooth = if self.next_tooth == last_present {
            0
        } else {
            self.next_tooth + 1
        };
        t
    }
}

impl Iterator for CrankWheel {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        Some(self.advance())
    }
}
