//! Definitions of celestial bodies.

use std::{collections::BTreeMap, f64::consts::TAU, sync::Arc};

use color_eyre::eyre::{self, OptionExt};
use serde::{Deserialize, Serialize};

use crate::math::FloatCurve;

/// Conversion from static pressure (`atm`) to density (`kg/m^3`) at the
/// stock temperature profile.
pub const DENSITY_FACTOR: f64 = 1.223_094_855_487_4;

/// A celestial body a vessel can launch from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Name of this body as displayed in KSP
    pub name: Arc<str>,
    /// Standard gravitational parameter (`m^3/s^2`)
    pub mu: f64,
    /// Mean radius of the body's sphere (`m`)
    pub radius: f64,
    /// Rotational period, length of sidereal day (`sec`)
    pub rotperiod: f64,
    /// Does the surface rotate with the body?
    #[serde(default = "default_true")]
    pub rotates: bool,
    #[serde(default)]
    pub atmosphere: Option<Atmosphere>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Atmosphere {
    /// Altitude at which the atmosphere ends (`m`)
    pub max_altitude: f64,
    /// Static pressure (`atm`) against altitude (`m`). When empty, an
    /// exponential profile from `sea_level_pressure` and `scale_height` is
    /// used instead.
    #[serde(default)]
    pub pressure_curve: FloatCurve,
    /// Static pressure at sea level (`atm`)
    #[serde(default = "default_sea_level_pressure")]
    pub sea_level_pressure: f64,
    /// Scale height of the exponential profile (`m`)
    #[serde(default = "default_scale_height")]
    pub scale_height: f64,
    #[serde(default = "default_density_factor")]
    pub density_factor: f64,
    /// Speed of sound used for Mach numbers (`m/s`)
    #[serde(default = "default_speed_of_sound")]
    pub speed_of_sound: f64,
}

fn default_true() -> bool {
    true
}

fn default_sea_level_pressure() -> f64 {
    1.0
}

fn default_scale_height() -> f64 {
    5000.0
}

fn default_density_factor() -> f64 {
    DENSITY_FACTOR
}

fn default_speed_of_sound() -> f64 {
    340.29
}

impl Atmosphere {
    /// An exponential atmosphere.
    pub fn exponential(max_altitude: f64, sea_level_pressure: f64, scale_height: f64) -> Self {
        Self {
            max_altitude,
            pressure_curve: FloatCurve::new(),
            sea_level_pressure,
            scale_height,
            density_factor: DENSITY_FACTOR,
            speed_of_sound: default_speed_of_sound(),
        }
    }

    /// Static pressure (`atm`) at `altitude` (`m`).
    pub fn pressure(&self, altitude: f64) -> f64 {
        if altitude >= self.max_altitude {
            return 0.0;
        }
        let altitude = altitude.max(0.0);
        if self.pressure_curve.is_empty() {
            self.sea_level_pressure * libm::exp(-altitude / self.scale_height)
        } else {
            self.pressure_curve.evaluate(altitude).max(0.0)
        }
    }
}

impl Body {
    /// Angular velocity of the surface (`rad/s`), zero for non-rotating
    /// bodies.
    pub fn angular_velocity(&self) -> f64 {
        if self.rotates && self.rotperiod != 0.0 {
            TAU / self.rotperiod
        } else {
            0.0
        }
    }

    /// Top of the atmosphere (`m`), or `None` for airless bodies.
    pub fn atmosphere_height(&self) -> Option<f64> {
        self.atmosphere.as_ref().map(|a| a.max_altitude)
    }

    /// Static pressure (`atm`) at `altitude` (`m`).
    pub fn static_pressure(&self, altitude: f64) -> f64 {
        self.atmosphere.as_ref().map_or(0.0, |a| a.pressure(altitude))
    }

    /// Atmospheric density (`kg/m^3`) at the given static pressure (`atm`).
    pub fn density(&self, pressure: f64) -> f64 {
        self.atmosphere
            .as_ref()
            .map_or(0.0, |a| pressure * a.density_factor)
    }

    pub fn speed_of_sound(&self) -> f64 {
        self.atmosphere
            .as_ref()
            .map_or_else(default_speed_of_sound, |a| a.speed_of_sound)
    }

    pub fn kerbin() -> Self {
        Self {
            name: "Kerbin".into(),
            mu: 3.5316e12,
            radius: 600_000.0,
            rotperiod: 21_549.425,
            rotates: true,
            atmosphere: Some(Atmosphere::exponential(70_000.0, 1.0, 5000.0)),
        }
    }

    pub fn mun() -> Self {
        Self {
            name: "Mun".into(),
            mu: 6.513_839_8e10,
            radius: 200_000.0,
            rotperiod: 138_984.38,
            rotates: true,
            atmosphere: None,
        }
    }

    pub fn minmus() -> Self {
        Self {
            name: "Minmus".into(),
            mu: 1.7658e9,
            radius: 60_000.0,
            rotperiod: 40_400.0,
            rotates: true,
            atmosphere: None,
        }
    }

    pub fn duna() -> Self {
        Self {
            name: "Duna".into(),
            mu: 3.013_632_1e11,
            radius: 320_000.0,
            rotperiod: 65_517.859,
            rotates: true,
            atmosphere: Some(Atmosphere::exponential(50_000.0, 0.066_613_9, 5700.0)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolarSystem {
    pub bodies: BTreeMap<Arc<str>, Arc<Body>>,
}

impl Default for SolarSystem {
    fn default() -> Self {
        [Body::kerbin(), Body::mun(), Body::minmus(), Body::duna()]
            .into_iter()
            .collect()
    }
}

impl SolarSystem {
    pub fn get(&self, name: &str) -> Option<&Arc<Body>> {
        self.bodies.get(name)
    }

    pub fn body(&self, name: &str) -> eyre::Result<Arc<Body>> {
        self.get(name)
            .cloned()
            .ok_or_eyre(format!("unknown body {name:?}"))
    }
}

impl FromIterator<Body> for SolarSystem {
    fn from_iter<I: IntoIterator<Item = Body>>(iter: I) -> Self {
        Self {
            bodies: iter
                .into_iter()
                .map(|b| (b.name.clone(), Arc::new(b)))
                .collect(),
        }
    }
}

#[test]
fn kerbin_atmosphere() {
    let kerbin = Body::kerbin();
    assert!((kerbin.static_pressure(0.0) - 1.0).abs() < 1e-12);
    assert!((kerbin.density(1.0) - DENSITY_FACTOR).abs() < 1e-12);
    assert_eq!(kerbin.static_pressure(70_000.0), 0.0);
    assert!(kerbin.static_pressure(5000.0) < kerbin.static_pressure(1000.0));
    assert!((kerbin.angular_velocity() * kerbin.rotperiod - TAU).abs() < 1e-9);

    let mun = Body::mun();
    assert_eq!(mun.static_pressure(0.0), 0.0);
    assert_eq!(mun.density(mun.static_pressure(0.0)), 0.0);
}

#[test]
fn pressure_curve_overrides_exponential() {
    let mut atmosphere = Atmosphere::exponential(1000.0, 1.0, 100.0);
    atmosphere.pressure_curve = [(0.0, 0.5), (1000.0, 0.0)].into_iter().collect();
    assert!((atmosphere.pressure(0.0) - 0.5).abs() < 1e-12);
    assert!(SolarSystem::default().body("Kerbin").is_ok());
    assert!(SolarSystem::default().body("Jool").is_err());
}
