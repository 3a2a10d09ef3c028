use crate::network::Link;

/// Everything a disutility may depend on besides the link itself. Passed explicitly into every
/// evaluation, so implementations never need shared placeholder persons or vehicles.
#[derive(Debug, Clone, PartialEq)]
pub struct CostContext {
    pub mode: String,
    /// Maximum speed of the travelling vehicle in m/s. Unlimited if `None`.
    pub max_speed: Option<f64>,
    /// Seconds after midnight.
    pub departure_time: f64,
}

impl CostContext {
    pub fn new(mode: impl Into<String>) -> Self {
        CostContext {
            mode: mode.into(),
            max_speed: None,
            departure_time: 0.,
        }
    }

    pub fn with_max_speed(mut self, max_speed: f64) -> Self {
        self.max_speed = Some(max_speed);
        self
    }

    pub fn with_departure_time(mut self, departure_time: f64) -> Self {
        self.departure_time = departure_time;
        self
    }

    /// Speed actually driven on a link.
    pub fn effective_speed(&self, link: &Link) -> f64 {
        match self.max_speed {
            Some(max_speed) => max_speed.min(link.freespeed),
            None => link.freespeed,
        }
    }
}

/// Per link travel time and generalized cost. Evaluated once per link while the compact graph is
/// built, so implementations may be arbitrarily expensive.
pub trait TravelDisutility: Send + Sync {
    /// Seconds needed to traverse the link.
    fn link_travel_time(&self, link: &Link, context: &CostContext) -> f64 {
        let speed = context.effective_speed(link);
        if speed > 0. {
            link.length / speed
        } else {
            f64::INFINITY
        }
    }

    fn link_cost(&self, link: &Link, context: &CostContext) -> f64;
}

/// Cost equals free speed travel time.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreespeedTravelTime;

impl TravelDisutility for FreespeedTravelTime {
    fn link_cost(&self, link: &Link, context: &CostContext) -> f64 {
        self.link_travel_time(link, context)
    }
}

/// Cost equals link length in meters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceDisutility;

impl TravelDisutility for DistanceDisutility {
    fn link_cost(&self, link: &Link, _context: &CostContext) -> f64 {
        link.length
    }
}

/// Weighted sum of travel time and distance, e.g. marginal utilities of time and distance.
#[derive(Debug, Clone, Copy)]
pub struct LinearDisutility {
    pub time_weight: f64,
    pub distance_weight: f64,
}

impl TravelDisutility for LinearDisutility {
    fn link_cost(&self, link: &Link, context: &CostContext) -> f64 {
        self.time_weight * self.link_travel_time(link, context) + self.distance_weight * link.length
    }
}
