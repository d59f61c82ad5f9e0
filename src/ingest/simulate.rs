//! Synthetic monthly series used when measured data is unavailable.

use chrono::{Datelike, NaiveDate};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{StandardNormal, Uniform};
use std::f64::consts::PI;

use crate::calendar::{month_starts_within, to_instant};
use crate::types::{Observation, Provenance, TrafficObservation};

pub const POLLUTION_UNIT: &str = "µg/m³";

/// Which synthetic series an RNG feeds. Each kind draws from its own stream,
/// so a city's pollution and traffic noise are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Pollution,
    Traffic,
}

impl Stream {
    fn salt(self) -> u64 {
        match self {
            Stream::Pollution => 0,
            Stream::Traffic => 0x9E37_79B9_7F4A_7C15,
        }
    }
}

/// Per-city RNG derived from a base seed, the series kind and the city's
/// position.
pub fn city_rng(seed: u64, stream: Stream, index: usize) -> StdRng {
    StdRng::seed_from_u64((seed ^ stream.salt()).wrapping_add(index as u64))
}

/// N(0, 5) draw.
fn noise(rng: &mut StdRng) -> f64 {
    5.0 * rng.sample::<f64, _>(StandardNormal)
}

/// One reading per month start in range:
/// `max(0, U(20, 70) + 10 sin(2π month / 12) + N(0, 5))`.
pub fn simulate_pollution(
    city: &str,
    start: NaiveDate,
    end: NaiveDate,
    rng: &mut StdRng,
) -> Vec<Observation> {
    let months = month_starts_within(start, end);
    if months.is_empty() {
        return Vec::new();
    }
    let baseline = rng.sample(Uniform::new(20.0, 70.0));

    months
        .into_iter()
        .map(|m| {
            let seasonal = 10.0 * (2.0 * PI * f64::from(m.month()) / 12.0).sin();
            let value = (baseline + seasonal + noise(rng)).max(0.0);
            Observation {
                timestamp: to_instant(m),
                city: city.to_string(),
                value: Some(value),
                unit: POLLUTION_UNIT.to_string(),
                source: Provenance::Simulated,
            }
        })
        .collect()
}

/// Synthetic pollution for every city, each from its own seeded stream.
pub fn simulate_pollution_for(
    cities: &[String],
    start: NaiveDate,
    end: NaiveDate,
    seed: u64,
) -> Vec<Observation> {
    cities
        .iter()
        .enumerate()
        .flat_map(|(i, city)| {
            simulate_pollution(city, start, end, &mut city_rng(seed, Stream::Pollution, i))
        })
        .collect()
}

/// Monthly transport index per city:
/// `max(0, U(60, 120) + linspace(0, 10) + N(0, 5))`.
pub fn simulate_traffic(
    cities: &[String],
    start: NaiveDate,
    end: NaiveDate,
    seed: u64,
) -> Vec<TrafficObservation> {
    let months = month_starts_within(start, end);
    let n = months.len();

    cities
        .iter()
        .enumerate()
        .flat_map(|(i, city)| {
            let mut rng = city_rng(seed, Stream::Traffic, i);
            let baseline = rng.sample(Uniform::new(60.0, 120.0));
            months
                .iter()
                .enumerate()
                .map(|(t, m)| {
                    let trend = if n > 1 {
                        10.0 * t as f64 / (n - 1) as f64
                    } else {
                        0.0
                    };
                    TrafficObservation {
                        timestamp: to_instant(*m),
                        city: city.clone(),
                        traffic_index: Some((baseline + trend + noise(&mut rng)).max(0.0)),
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
