//! Planar ascent model: a vessel flying a fixed gravity turn over a
//! rotating body, integrated with RK4 while a closed-loop throttle keeps it
//! under an acceleration cap and near terminal velocity.

use std::f64::consts::FRAC_PI_2;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::{
    bodies::Body,
    engine::{Conditions, EngineModel},
};

/// Position and velocity are in a body-centred, non-rotating plane (`m`,
/// `m/s`), with the launch site on the +y axis.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AscentState {
    pub position: Vector2<f64>,
    pub velocity: Vector2<f64>,
    /// (kg)
    pub mass: f64,
    pub throttle: f64,
}

impl AscentState {
    /// At rest on the surface, `altitude` above the datum.
    pub fn on_pad(body: &Body, altitude: f64, mass: f64) -> Self {
        let y = body.radius + altitude;
        Self {
            position: Vector2::new(0.0, y),
            velocity: Vector2::new(y * body.angular_velocity(), 0.0),
            mass,
            throttle: 1.0,
        }
    }

    pub fn radius(&self) -> f64 {
        self.position.norm()
    }

    pub fn altitude(&self, body: &Body) -> f64 {
        self.radius() - body.radius
    }

    /// Local vertical.
    pub fn up(&self) -> Vector2<f64> {
        self.position.try_normalize(0.0).unwrap_or_else(Vector2::y)
    }

    /// Velocity relative to the rotating surface.
    pub fn surface_velocity(&self, body: &Body) -> Vector2<f64> {
        let omega = body.angular_velocity();
        self.velocity - omega * Vector2::new(self.position.y, -self.position.x)
    }
}

/// Time derivative of an [`AscentState`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DState {
    pub velocity: Vector2<f64>,
    pub acceleration: Vector2<f64>,
    /// (kg/s)
    pub mass_rate: f64,
    /// Thrust and drag only.
    pub acceleration_no_gravity: Vector2<f64>,
}

impl DState {
    /// Classic RK4 weighting of four slopes.
    fn rk4(k1: &Self, k2: &Self, k3: &Self, k4: &Self) -> Self {
        let w = |a: Vector2<f64>, b: Vector2<f64>, c: Vector2<f64>, d: Vector2<f64>| {
            (a + 2.0 * b + 2.0 * c + d) / 6.0
        };
        Self {
            velocity: w(k1.velocity, k2.velocity, k3.velocity, k4.velocity),
            acceleration: w(k1.acceleration, k2.acceleration, k3.acceleration, k4.acceleration),
            mass_rate: (k1.mass_rate + 2.0 * k2.mass_rate + 2.0 * k3.mass_rate + k4.mass_rate)
                / 6.0,
            acceleration_no_gravity: w(
                k1.acceleration_no_gravity,
                k2.acceleration_no_gravity,
                k3.acceleration_no_gravity,
                k4.acceleration_no_gravity,
            ),
        }
    }
}

/// Throttles down when drag gets close to gravity.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalVelocityLimiter {
    /// Drag-to-gravity ratio above which the limiter engages.
    pub threshold: f64,
    pub gain: f64,
    /// Correction the limiter saturates towards as the ratio approaches the
    /// threshold. Infinite disables saturation.
    pub max_correction: f64,
}

impl Default for TerminalVelocityLimiter {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            gain: 0.4,
            max_correction: 10.0,
        }
    }
}

impl TerminalVelocityLimiter {
    /// Thrust-to-gravity factor at `drag_ratio`, if the limiter is engaged.
    pub fn correction(&self, drag_ratio: f64) -> Option<f64> {
        if drag_ratio <= self.threshold {
            return None;
        }
        let raw = self.gain / (drag_ratio - self.threshold);
        if self.max_correction.is_finite() && self.max_correction > 0.0 {
            Some(raw * self.max_correction / (raw + self.max_correction))
        } else {
            Some(raw)
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AscentParameters {
    pub drag_multiplier: f64,
    /// Largest throttle change accepted across one step.
    pub throttle_tolerance: f64,
    /// Steps are not halved below this (s).
    pub min_step: f64,
    /// Gravity turn start, as a fraction of the atmosphere height.
    pub turn_start_fraction: f64,
    pub turn_exponent: f64,
    pub terminal_velocity: TerminalVelocityLimiter,
}

impl Default for AscentParameters {
    fn default() -> Self {
        Self {
            drag_multiplier: 0.008,
            throttle_tolerance: 0.05,
            min_step: 1e-3,
            turn_start_fraction: 0.1,
            turn_exponent: 0.4,
            terminal_velocity: TerminalVelocityLimiter::default(),
        }
    }
}

/// The default gravity turn.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AscentPath {
    /// (m)
    pub turn_start: f64,
    /// (m)
    pub turn_end: f64,
    pub exponent: f64,
}

impl AscentPath {
    pub fn for_body(body: &Body, params: &AscentParameters) -> Self {
        let (turn_start, turn_end) = match body.atmosphere_height() {
            Some(height) => (height * params.turn_start_fraction, height),
            None => (25.0, 30_000.0),
        };
        Self {
            turn_start,
            turn_end,
            exponent: params.turn_exponent,
        }
    }

    /// Angle of the thrust from the local vertical at `altitude` (rad).
    pub fn flight_path_angle(&self, altitude: f64) -> f64 {
        if altitude <= self.turn_start {
            0.0
        } else if altitude >= self.turn_end {
            FRAC_PI_2
        } else {
            let progress = (altitude - self.turn_start) / (self.turn_end - self.turn_start);
            libm::pow(progress, self.exponent) * FRAC_PI_2
        }
    }
}

/// One accepted integration step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AscentStep {
    pub state: AscentState,
    /// Derivative at the start of the step.
    pub derivative: DState,
    /// Throttle at the start of the step.
    pub start_throttle: f64,
    /// Length actually integrated (s).
    pub dt: f64,
}

/// Integrates the ascent for a fixed set of active engines.
#[derive(Clone, Debug)]
pub struct AscentIntegrator<'s, 'a> {
    body: &'s Body,
    engines: &'s [EngineModel<'a>],
    params: &'s AscentParameters,
    path: AscentPath,
    max_acceleration: f64,
    limit_to_terminal_velocity: bool,
    drag_coefficient: f64,
}

impl<'s, 'a> AscentIntegrator<'s, 'a> {
    pub fn new(body: &'s Body, engines: &'s [EngineModel<'a>], params: &'s AscentParameters) -> Self {
        Self {
            body,
            engines,
            params,
            path: AscentPath::for_body(body, params),
            max_acceleration: f64::INFINITY,
            limit_to_terminal_velocity: false,
            drag_coefficient: 0.0,
        }
    }

    /// Acceleration cap (`m/s^2`). Zero or less means no cap.
    pub fn max_acceleration(self, max_acceleration: f64) -> Self {
        Self {
            max_acceleration: if max_acceleration > 0.0 {
                max_acceleration
            } else {
                f64::INFINITY
            },
            ..self
        }
    }

    pub fn limit_to_terminal_velocity(self, limit_to_terminal_velocity: bool) -> Self {
        Self {
            limit_to_terminal_velocity,
            ..self
        }
    }

    pub fn drag_coefficient(self, drag_coefficient: f64) -> Self {
        Self {
            drag_coefficient,
            ..self
        }
    }

    /// Ambient conditions at `state`, throttle left at zero.
    pub fn conditions(&self, state: &AscentState) -> Conditions {
        let atm_pressure = self.body.static_pressure(state.altitude(self.body));
        Conditions {
            atm_pressure,
            atm_density: self.body.density(atm_pressure),
            mach_number: state.surface_velocity(self.body).norm() / self.body.speed_of_sound(),
            main_throttle: 0.0,
        }
    }

    fn thrust(&self, conditions: Conditions) -> f64 {
        self.engines.iter().map(|e| e.thrust(conditions)).sum()
    }

    /// Derivative at `state`, and the throttle the controller picks there.
    pub fn derivative(&self, state: &AscentState) -> (DState, f64) {
        let body = self.body;
        let r = state.radius();
        let up = state.up();
        let m = state.mass;

        let theta = libm::atan2(up.x, up.y);
        let thrust_angle = theta + self.path.flight_path_angle(r - body.radius);
        let direction = Vector2::new(libm::sin(thrust_angle), libm::cos(thrust_angle));

        let grav_acc = -body.mu / (r * r);

        let conditions = self.conditions(state);
        let surface_velocity = state.surface_velocity(body);
        let v = surface_velocity.norm();
        let drag_acc = -0.5
            * conditions.atm_density
            * v
            * v
            * self.drag_coefficient
            * self.params.drag_multiplier;

        let mut desired_thrust = f64::INFINITY;
        if v > 0.0 {
            let drag_along_thrust = drag_acc * surface_velocity.dot(&direction) / v;
            desired_thrust = desired_thrust.min((self.max_acceleration - drag_along_thrust) * m);

            let drag_ratio = (drag_acc * surface_velocity.dot(&up) / (grav_acc * v)).abs();
            let cos_t = libm::cos(theta - thrust_angle);
            if self.limit_to_terminal_velocity && cos_t.abs() > 1e-3 {
                if let Some(correction) = self.params.terminal_velocity.correction(drag_ratio) {
                    desired_thrust = desired_thrust.min(correction * -grav_acc * m / cos_t.abs());
                }
            }
        } else {
            desired_thrust = desired_thrust.min(self.max_acceleration * m);
        }

        let min_thrust = self.thrust(conditions.with_throttle(0.0));
        let max_thrust = self.thrust(conditions.with_throttle(1.0));
        let throttle = if max_thrust <= min_thrust {
            1.0
        } else {
            ((desired_thrust - min_thrust) / (max_thrust - min_thrust)).clamp(0.0, 1.0)
        };

        let conditions = conditions.with_throttle(throttle);
        let thrust = self.thrust(conditions);
        let mass_rate = -self
            .engines
            .iter()
            .map(|e| e.evaluate_fuel_flow(conditions, None))
            .sum::<f64>();

        let mut acceleration_no_gravity = Vector2::zeros();
        if m > 0.0 {
            acceleration_no_gravity += direction * (thrust / m);
        }
        if v > 0.0 {
            acceleration_no_gravity += surface_velocity * (drag_acc / v);
        }

        let derivative = DState {
            velocity: state.velocity,
            acceleration: acceleration_no_gravity + up * grav_acc,
            mass_rate,
            acceleration_no_gravity,
        };
        (derivative, throttle)
    }

    /// Euler increment of `state` along `derivative`, kept above ground.
    pub fn increment(&self, state: &AscentState, derivative: &DState, dt: f64) -> AscentState {
        let mut next = AscentState {
            position: state.position + derivative.velocity * dt,
            velocity: state.velocity + derivative.acceleration * dt,
            mass: state.mass + derivative.mass_rate * dt,
            throttle: state.throttle,
        };

        let radius = self.body.radius;
        let r = next.radius();
        if r <= radius {
            next.position = if r > 0.0 {
                next.position * (radius / r)
            } else {
                Vector2::new(0.0, radius)
            };
            next.velocity =
                self.body.angular_velocity() * Vector2::new(next.position.y, -next.position.x);
        }
        next
    }

    /// One RK4 step of `dt`. Returns the new state, the starting derivative
    /// and the starting throttle.
    pub fn rk4(&self, state: &AscentState, dt: f64) -> (AscentState, DState, f64) {
        let (k1, start_throttle) = self.derivative(state);
        let (k2, _) = self.derivative(&self.increment(state, &k1, dt / 2.0));
        let (k3, _) = self.derivative(&self.increment(state, &k2, dt / 2.0));
        let (k4, _) = self.derivative(&self.increment(state, &k3, dt));

        let mut next = self.increment(state, &DState::rk4(&k1, &k2, &k3, &k4), dt);
        next.throttle = self.derivative(&next).1;
        (next, k1, start_throttle)
    }

    /// Integrates up to `dt`, halving the step while the throttle moves by
    /// more than the tolerance across it.
    pub fn step(&self, state: &AscentState, dt: f64) -> AscentStep {
        let mut dt = dt;
        loop {
            let (next, derivative, start_throttle) = self.rk4(state, dt);
            if (next.throttle - start_throttle).abs() <= self.params.throttle_tolerance
                || dt * 0.5 < self.params.min_step
            {
                return AscentStep {
                    state: next,
                    derivative,
                    start_throttle,
                    dt,
                };
            }
            dt *= 0.5;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gravity_turn_profile() {
        let params = AscentParameters::default();
        let kerbin = AscentPath::for_body(&Body::kerbin(), &params);
        assert!((kerbin.turn_start - 7000.0).abs() < 1e-9);
        assert_eq!(kerbin.turn_end, 70_000.0);
        assert_eq!(kerbin.flight_path_angle(100.0), 0.0);
        assert_eq!(kerbin.flight_path_angle(80_000.0), FRAC_PI_2);
        let mid = kerbin.flight_path_angle(38_500.0);
        assert!((mid - libm::pow(0.5, 0.4) * FRAC_PI_2).abs() < 1e-9);

        let mun = AscentPath::for_body(&Body::mun(), &params);
        assert_eq!((mun.turn_start, mun.turn_end), (25.0, 30_000.0));
    }

    #[test]
    fn limiter_saturates() {
        let limiter = TerminalVelocityLimiter::default();
        assert_eq!(limiter.correction(0.5), None);
        let near = limiter.correction(0.9 + 1e-9).unwrap();
        assert!(near < limiter.max_correction && near > 0.99 * limiter.max_correction);
        let far = limiter.correction(1.3).unwrap();
        assert!((far - 1.0 * 10.0 / 11.0).abs() < 1e-9);

        let unsaturated = TerminalVelocityLimiter {
            max_correction: f64::INFINITY,
            ..limiter
        };
        assert!((unsaturated.correction(1.3).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn states_below_ground_are_put_back_on_the_surface() {
        let kerbin = Body::kerbin();
        let params = AscentParameters::default();
        let integrator = AscentIntegrator::new(&kerbin, &[], &params);

        let state = AscentState {
            position: Vector2::new(0.0, kerbin.radius - 10.0),
            velocity: Vector2::new(5.0, -5.0),
            mass: 1000.0,
            throttle: 1.0,
        };
        let next = integrator.increment(&state, &DState::default(), 1.0);
        assert!((next.position - Vector2::new(0.0, kerbin.radius)).norm() < 1e-6);
        assert!(next.surface_velocity(&kerbin).norm() < 1e-9);
    }

    #[test]
    fn no_thrust_means_free_fall_at_full_throttle() {
        let mun = Body::mun();
        let params = AscentParameters::default();
        let integrator = AscentIntegrator::new(&mun, &[], &params).max_acceleration(5.0);

        let state = AscentState::on_pad(&mun, 0.0, 1000.0);
        assert!(state.surface_velocity(&mun).norm() < 1e-9);
        let (derivative, throttle) = integrator.derivative(&state);
        assert_eq!(throttle, 1.0);
        assert_eq!(derivative.mass_rate, 0.0);
        let g = mun.mu / (mun.radius * mun.radius);
        assert!((derivative.acceleration - Vector2::new(0.0, -g)).norm() < 1e-9);
    }
}
