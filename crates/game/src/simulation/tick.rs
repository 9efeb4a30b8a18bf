/// Longest frame the accumulator accepts. A stalled loop catches up at most
/// this much instead of replaying the whole stall.
const MAX_FRAME: f32 = 0.25;

/// Converts wall-clock frame times into a whole number of simulation steps.
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
    tick: u32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
            tick: 0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Steps taken so far.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Adds one frame of elapsed time and returns how many steps are now due.
    pub fn advance(&mut self, elapsed: f32) -> u32 {
        self.accumulator += elapsed.clamp(0.0, MAX_FRAME);

        let mut steps = 0;
        while self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            steps += 1;
        }
        self.tick = self.tick.wrapping_add(steps);
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_follow_elapsed_time() {
        let mut timestep = FixedTimestep::new(60);

        assert_eq!(timestep.advance(1.0 / 120.0), 0);
        assert_eq!(timestep.advance(1.0 / 30.0), 2);
        assert_eq!(timestep.tick(), 2);
    }

    #[test]
    fn stalls_are_clamped() {
        let mut timestep = FixedTimestep::new(10);
        assert!(timestep.advance(5.0) <= 3);
        assert_eq!(timestep.advance(-1.0), 0);
    }

    #[test]
    fn zero_rate_is_treated_as_one() {
        let timestep = FixedTimestep::new(0);
        assert_eq!(timestep.tick_rate(), 1);
        assert_eq!(timestep.dt(), 1.0);
    }
}
