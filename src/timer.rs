use std::time::Instant;

use crate::property::{Property, PropertyError, PropertyType};

/// Produces a microsecond ticker for animations. A non-zero `ticker_us`
/// input is forwarded unchanged; zero switches to the internal clock.
#[derive(Debug, Default)]
pub struct TimerNode {
    start: Option<Instant>,
}

impl TimerNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn interface() -> (Property, Property) {
        (
            Property::new_struct("IN", vec![Property::new("ticker_us", PropertyType::Int64)]),
            Property::new_struct("OUT", vec![Property::new("ticker_us", PropertyType::Int64)]),
        )
    }

    /// Running on the internal clock; such a timer re-runs every update.
    pub fn is_auto(&self, inputs: &Property) -> bool {
        external_ticker(inputs) == 0
    }

    pub(crate) fn tick(
        &mut self,
        inputs: &Property,
        outputs: &mut Property,
    ) -> Result<bool, PropertyError> {
        let ticker = match external_ticker(inputs) {
            0 => {
                let start = *self.start.get_or_insert_with(Instant::now);
                let elapsed = i64::try_from(start.elapsed().as_micros()).unwrap_or(i64::MAX);
                // never report 0, it means "no time yet" downstream
                elapsed.saturating_add(1)
            }
            external => external,
        };
        outputs.set_at(&[0], ticker)
    }
}

fn external_ticker(inputs: &Property) -> i64 {
    inputs
        .child_at(0)
        .and_then(Property::get::<i64>)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_external_ticker() {
        let mut timer = TimerNode::new();
        let (mut inputs, mut outputs) = TimerNode::interface();
        inputs.set_at(&[0], 1_500i64).unwrap();
        assert!(!timer.is_auto(&inputs));
        assert!(timer.tick(&inputs, &mut outputs).unwrap());
        assert_eq!(outputs.child_at(0).unwrap().get::<i64>(), Some(1_500));
    }

    #[test]
    fn internal_clock_is_monotonic_and_positive() {
        let mut timer = TimerNode::new();
        let (inputs, mut outputs) = TimerNode::interface();
        assert!(timer.is_auto(&inputs));

        timer.tick(&inputs, &mut outputs).unwrap();
        let first = outputs.child_at(0).unwrap().get::<i64>().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        timer.tick(&inputs, &mut outputs).unwrap();
        let second = outputs.child_at(0).unwrap().get::<i64>().unwrap();

        assert!(first >= 1);
        assert!(second > first);
    }
}
