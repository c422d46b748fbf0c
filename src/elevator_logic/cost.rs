//! Distance based cost of serving one request.
//!
//! This is the cheap heuristic. The leader normally assigns with the time-to-idle
//! simulation in [`crate::manager::task_allocator`], and falls back to [`best_car`]
//! when the external assigner fails.

use crate::config;
use crate::elevio::{CallButton, CallType};
use crate::world_view::Dirn;
use crate::CarId;

/// Cost of serving `request_floor`/`button` from `current_floor` while travelling in `dirn`.
///
/// The base cost is the floor distance. A request that needs the car to turn around
/// first costs [`config::REVERSAL_PENALTY`] extra, so same-direction requests always win.
/// Cab calls and stopped cars are never penalised.
///
/// ```
/// use elevator_fleet::elevator_logic::cost::compute_cost;
/// use elevator_fleet::elevio::CallType;
/// use elevator_fleet::world_view::Dirn;
///
/// assert_eq!(compute_cost(5, CallType::HallUp, 2, Dirn::Up), 3);
/// assert_eq!(compute_cost(5, CallType::HallUp, 2, Dirn::Down), 1003);
/// ```
pub fn compute_cost(request_floor: u8, button: CallType, current_floor: u8, dirn: Dirn) -> u32 {
    let distance = (current_floor as i32 - request_floor as i32).unsigned_abs();

    let on_the_way = match (button, dirn) {
        (CallType::Cab, _) | (_, Dirn::Stop) => true,
        (CallType::HallUp, Dirn::Up) => request_floor >= current_floor,
        (CallType::HallDown, Dirn::Down) => request_floor <= current_floor,
        _ => false,
    };

    if on_the_way {
        distance
    } else {
        distance + config::REVERSAL_PENALTY
    }
}

/// Cheapest car for `call` among `(id, floor, dirn)` candidates. Ties go to the lowest ID.
pub fn best_car<I>(call: CallButton, cars: I) -> Option<CarId>
where
    I: IntoIterator<Item = (CarId, u8, Dirn)>,
{
    cars.into_iter()
        .map(|(id, floor, dirn)| (compute_cost(call.floor, call.call_type, floor, dirn), id))
        .min()
        .map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_towards_a_matching_call_costs_the_distance() {
        assert_eq!(compute_cost(5, CallType::HallUp, 2, Dirn::Up), 3);
        assert_eq!(compute_cost(1, CallType::HallDown, 3, Dirn::Down), 2);
        assert_eq!(compute_cost(2, CallType::HallUp, 2, Dirn::Up), 0);
    }

    #[test]
    fn reversal_is_penalised() {
        assert_eq!(compute_cost(5, CallType::HallUp, 2, Dirn::Down), 1003);
        // right way, wrong button
        assert_eq!(compute_cost(5, CallType::HallDown, 2, Dirn::Up), 1003);
        // already passed it
        assert_eq!(compute_cost(1, CallType::HallUp, 2, Dirn::Up), 1001);
    }

    #[test]
    fn cab_and_stopped_are_plain_distance() {
        assert_eq!(compute_cost(0, CallType::Cab, 3, Dirn::Up), 3);
        assert_eq!(compute_cost(3, CallType::HallDown, 0, Dirn::Stop), 3);
    }

    #[test]
    fn best_car_prefers_no_reversal_then_lowest_id() {
        let call = CallButton::new(3, CallType::HallDown);
        let cars = [(1, 0, Dirn::Up), (2, 4, Dirn::Down)];
        assert_eq!(best_car(call, cars), Some(2));

        let tie = [(3, 1, Dirn::Stop), (2, 5, Dirn::Stop)];
        assert_eq!(best_car(call, tie), Some(2));

        assert_eq!(best_car(call, std::iter::empty()), None);
    }
}
