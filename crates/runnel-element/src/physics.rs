//! Contracts for the physics black boxes, with bucket-model reference
//! implementations.
//!
//! Both modules are pure functions of their inputs. The land-surface
//! module runs at lower precision than the engine, so it reports its own
//! mass error and the caller books that error into its water-created
//! ledger instead of trusting the module's bookkeeping.

use std::io::{Read, Write};

use runnel_core::codec::{read_f64_le, write_f64_le, Decode, Encode};
use runnel_core::CodecError;

use crate::forcing::Forcing;

// ── Land surface ────────────────────────────────────────────────

/// Water held above the ground by the land-surface module (m of water).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LandState {
    /// Water intercepted on vegetation.
    pub canopy: f64,
    /// Snow water equivalent.
    pub snow: f64,
}

impl LandState {
    /// Total stored water (m).
    pub fn total(&self) -> f64 {
        self.canopy + self.snow
    }
}

/// Result of one land-surface step. All quantities are m of water over
/// the element.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LandSurfaceOutput {
    /// Water delivered to the ground surface (≥ 0).
    pub surface_add: f64,
    /// Evaporation from the canopy store.
    pub canopy_evaporation: f64,
    /// Sublimation from the snowpack.
    pub snow_evaporation: f64,
    /// Evaporation demanded from surface water.
    pub ground_evaporation: f64,
    /// Transpiration demanded from the root zone (≥ 0).
    pub transpiration: f64,
    /// Water the module created through its own roundoff. Positive means
    /// more water came out than went in.
    pub mass_error: f64,
}

/// The land-surface and evapotranspiration black box.
pub trait LandSurface: Send + Sync {
    /// Advance `state` by `dt` seconds with `surface_water` (m) available
    /// for ground evaporation.
    fn step(
        &self,
        forcing: &Forcing,
        state: &mut LandState,
        surface_water: f64,
        dt: f64,
    ) -> LandSurfaceOutput;
}

/// Canopy bucket plus degree-day snowpack, evaluated in `f32`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BucketLandSurface {
    /// Canopy interception capacity (m).
    pub canopy_capacity: f64,
    /// Snowmelt per degree above freezing (m/s/°C).
    pub melt_factor: f64,
    /// Share of leftover evaporative demand met by transpiration.
    pub transpiration_fraction: f64,
}

impl Default for BucketLandSurface {
    fn default() -> Self {
        Self {
            canopy_capacity: 0.002,
            melt_factor: 3.0e-8,
            transpiration_fraction: 0.5,
        }
    }
}

impl LandSurface for BucketLandSurface {
    fn step(
        &self,
        forcing: &Forcing,
        state: &mut LandState,
        surface_water: f64,
        dt: f64,
    ) -> LandSurfaceOutput {
        let precipitation = (forcing.precipitation.max(0.0) * dt) as f32;
        let mut demand = (forcing.potential_evaporation.max(0.0) * dt) as f32;
        let mut canopy = state.canopy as f32;
        let mut snow = state.snow as f32;

        let rain = if forcing.temperature <= 0.0 {
            snow += precipitation;
            0.0
        } else {
            precipitation
        };
        let melt = if forcing.temperature > 0.0 {
            snow.min((self.melt_factor * forcing.temperature * dt) as f32)
        } else {
            0.0
        };
        snow -= melt;

        let interception = rain.min((self.canopy_capacity as f32 - canopy).max(0.0));
        canopy += interception;
        let throughfall = rain - interception;

        let canopy_evaporation = canopy.min(demand);
        canopy -= canopy_evaporation;
        demand -= canopy_evaporation;
        let snow_evaporation = snow.min(demand);
        snow -= snow_evaporation;
        demand -= snow_evaporation;

        let surface_add = throughfall + melt;
        let ground_evaporation = (surface_water as f32 + surface_add).max(0.0).min(demand);
        demand -= ground_evaporation;
        let transpiration = demand * self.transpiration_fraction as f32;

        let before = state.total();
        state.canopy = f64::from(canopy);
        state.snow = f64::from(snow);
        let out = f64::from(surface_add) + f64::from(canopy_evaporation) + f64::from(snow_evaporation);
        let mass_error = (state.total() - before) + out - forcing.precipitation.max(0.0) * dt;

        LandSurfaceOutput {
            surface_add: f64::from(surface_add),
            canopy_evaporation: f64::from(canopy_evaporation),
            snow_evaporation: f64::from(snow_evaporation),
            ground_evaporation: f64::from(ground_evaporation),
            transpiration: f64::from(transpiration),
            mass_error,
        }
    }
}

// ── Vadose zone ─────────────────────────────────────────────────

/// Unsaturated-zone storage between the ground surface and the water
/// table.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VadoseStore {
    /// Water held in the unsaturated zone (m of water).
    pub water: f64,
    /// Drainable porosity of the unsaturated zone.
    pub porosity: f64,
}

/// The vadose-zone solver black box.
pub trait VadoseSolver: Send + Sync {
    /// Move water from `surface_supply` (m) into `store`, and return the
    /// recharge (m of water) delivered to the water table at
    /// `water_table` (m elevation) below `ground` (m elevation).
    ///
    /// The solver must leave no recharge unaccounted: whatever it does not
    /// keep in `store` or leave in `surface_supply` is returned.
    fn resolve(
        &self,
        surface_supply: &mut f64,
        store: &mut VadoseStore,
        water_table: f64,
        ground: f64,
        dt: f64,
    ) -> f64;
}

/// Infiltration and gravity drainage at fixed rates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BucketVadoseSolver {
    /// Maximum infiltration rate (m/s).
    pub infiltration_rate: f64,
    /// Drainage rate to the water table (m/s).
    pub drainage_rate: f64,
}

impl Default for BucketVadoseSolver {
    fn default() -> Self {
        Self {
            infiltration_rate: 1.0e-5,
            drainage_rate: 1.0e-6,
        }
    }
}

impl VadoseSolver for BucketVadoseSolver {
    fn resolve(
        &self,
        surface_supply: &mut f64,
        store: &mut VadoseStore,
        water_table: f64,
        ground: f64,
        dt: f64,
    ) -> f64 {
        let capacity = store.porosity * (ground - water_table).max(0.0);
        let room = (capacity - store.water).max(0.0);
        let infiltration = surface_supply.max(0.0).min(self.infiltration_rate * dt).min(room);
        *surface_supply -= infiltration;
        store.water += infiltration;

        let drainage = store.water.min(self.drainage_rate * dt);
        store.water -= drainage;
        // A rising water table squeezes out whatever no longer fits.
        let squeezed = (store.water - capacity).max(0.0);
        store.water -= squeezed;
        drainage + squeezed
    }
}

impl Encode for LandState {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.canopy)?;
        write_f64_le(w, self.snow)
    }
}

impl Decode for LandState {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            canopy: read_f64_le(r)?,
            snow: read_f64_le(r)?,
        })
    }
}

impl Encode for VadoseStore {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_f64_le(w, self.water)?;
        write_f64_le(w, self.porosity)
    }
}

impl Decode for VadoseStore {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            water: read_f64_le(r)?,
            porosity: read_f64_le(r)?,
        })
    }
}
