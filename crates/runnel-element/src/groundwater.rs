//! Groundwater-mode state machine for mesh elements.
//!
//! A mesh element has up to two saturated layers: soil on top, aquifer
//! below. Lateral flows and vertical recharge accumulate in each layer's
//! `recharge` scratch during a step; [`Groundwater::resolve`] folds them
//! into heads and is the only place the mode may change:
//!
//! * `SaturatedAquifer`: the aquifer is full and the water table sits in
//!   the soil. A net loss that empties the soil drops to
//!   `UnsaturatedAquifer` with the aquifer head at its top.
//! * `UnsaturatedAquifer`: the water table sits in the aquifer and the
//!   soil is dry. Soil recharge beyond what the aquifer can take in one
//!   step perches in the soil (`PerchedWaterTable`).
//! * `PerchedWaterTable`: water stands in the soil above an unsaturated
//!   aquifer and leaks down into it. When the aquifer fills, the two
//!   saturated zones join (`SaturatedAquifer`).
//! * `NoMultilayer`: at least one layer is missing; the other behaves as a
//!   single bucket.
//!
//! Water that would push a head above the ground comes back out as
//! surface water. Water that would push a head below the layer bottom is
//! supplied from nothing and booked in the layer's `water_created` ledger.

use std::fmt;
use std::io::{Read, Write};

use runnel_core::codec::{read_f64_le, read_u8, write_f64_le, write_u8, Decode, Encode};
use runnel_core::{CodecError, ElementId, InvariantError, NeighborEndpoint};

/// Discrete regime governing vertical recharge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroundwaterMode {
    /// Aquifer full, water table in the soil layer.
    SaturatedAquifer,
    /// Water table in the aquifer, soil layer dry.
    UnsaturatedAquifer,
    /// Perched water in the soil above an unsaturated aquifer.
    PerchedWaterTable,
    /// Fewer than two layers.
    NoMultilayer,
}

impl fmt::Display for GroundwaterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SaturatedAquifer => "SATURATED_AQUIFER",
            Self::UnsaturatedAquifer => "UNSATURATED_AQUIFER",
            Self::PerchedWaterTable => "PERCHED_WATER_TABLE",
            Self::NoMultilayer => "NO_MULTILAYER",
        })
    }
}

/// One saturated layer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LayerState {
    /// Whether the layer is present at all.
    pub exists: bool,
    /// Bottom elevation (m).
    pub bottom: f64,
    /// Top elevation (m).
    pub top: f64,
    /// Specific yield.
    pub porosity: f64,
    /// Saturated conductivity (m/s).
    pub conductivity: f64,
    /// Water-table elevation (m), in `[bottom, top]`.
    pub head: f64,
    /// Net water gained this step (m of water). Zero between steps.
    pub recharge: f64,
    /// Water supplied from nothing to keep the head above the bottom (m³).
    pub water_created: f64,
}

impl LayerState {
    /// A present layer.
    pub fn new(bottom: f64, top: f64, porosity: f64, conductivity: f64, head: f64) -> Self {
        Self {
            exists: true,
            bottom,
            top,
            porosity,
            conductivity,
            head,
            recharge: 0.0,
            water_created: 0.0,
        }
    }

    /// A missing layer.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Drainable water above the bottom (m of water).
    pub fn storage(&self) -> f64 {
        if self.exists {
            (self.head - self.bottom).max(0.0) * self.porosity
        } else {
            0.0
        }
    }

    fn validate(&self) -> Result<(), String> {
        if !self.exists {
            return Ok(());
        }
        if !(self.bottom < self.top) {
            return Err(format!("layer bottom {} not below top {}", self.bottom, self.top));
        }
        if !(self.porosity > 0.0 && self.porosity <= 1.0) {
            return Err(format!("layer porosity {} outside (0, 1]", self.porosity));
        }
        if !(self.conductivity >= 0.0) {
            return Err(format!("layer conductivity {} is negative", self.conductivity));
        }
        if !(self.bottom <= self.head && self.head <= self.top) {
            return Err(format!(
                "head {} outside layer [{}, {}]",
                self.head, self.bottom, self.top
            ));
        }
        Ok(())
    }

    /// Raise or lower the head by `water` (m of water), spilling above the
    /// top into `spill` and booking any shortfall below the bottom.
    fn apply(&mut self, water: f64, area: f64, spill: &mut f64) {
        let head = self.head + water / self.porosity;
        if head > self.top {
            *spill += (head - self.top) * self.porosity;
            self.head = self.top;
        } else if head < self.bottom {
            self.water_created += (self.bottom - head) * self.porosity * area;
            self.head = self.bottom;
        } else {
            self.head = head;
        }
    }
}

fn take(v: &mut f64) -> f64 {
    std::mem::replace(v, 0.0)
}

enum Step {
    Done,
    Continue,
}

/// Transitions allowed per resolve before the state machine is declared
/// stuck. A real resolve needs at most three.
const MAX_TRANSITIONS: usize = 4;

/// Soil and aquifer layers with their mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Groundwater {
    mode: GroundwaterMode,
    soil: LayerState,
    aquifer: LayerState,
}

impl Groundwater {
    /// Build from the layers that exist, inferring the mode from heads.
    pub fn new(soil: Option<LayerState>, aquifer: Option<LayerState>) -> Result<Self, String> {
        let mut soil = soil.unwrap_or_default();
        let mut aquifer = aquifer.unwrap_or_default();
        soil.validate()?;
        aquifer.validate()?;
        let mode = if soil.exists && aquifer.exists {
            if aquifer.top > soil.bottom {
                return Err(format!(
                    "aquifer top {} above soil bottom {}",
                    aquifer.top, soil.bottom
                ));
            }
            if aquifer.head >= aquifer.top {
                aquifer.head = aquifer.top;
                GroundwaterMode::SaturatedAquifer
            } else if soil.head > soil.bottom {
                GroundwaterMode::PerchedWaterTable
            } else {
                soil.head = soil.bottom;
                GroundwaterMode::UnsaturatedAquifer
            }
        } else {
            GroundwaterMode::NoMultilayer
        };
        Ok(Self {
            mode,
            soil,
            aquifer,
        })
    }

    /// Current mode.
    pub fn mode(&self) -> GroundwaterMode {
        self.mode
    }

    /// The soil layer.
    pub fn soil(&self) -> &LayerState {
        &self.soil
    }

    /// The aquifer layer.
    pub fn aquifer(&self) -> &LayerState {
        &self.aquifer
    }

    /// Elevation of the uppermost saturated surface, or `ground` when
    /// there is none.
    pub fn water_table(&self, ground: f64) -> f64 {
        match self.mode {
            GroundwaterMode::SaturatedAquifer | GroundwaterMode::PerchedWaterTable => self.soil.head,
            GroundwaterMode::UnsaturatedAquifer => self.aquifer.head,
            GroundwaterMode::NoMultilayer => self.single().map_or(ground, |l| l.head),
        }
    }

    /// Head offered to neighbors on `endpoint`.
    pub fn level(&self, endpoint: NeighborEndpoint) -> f64 {
        match endpoint {
            NeighborEndpoint::MeshAquifer if self.mode == GroundwaterMode::SaturatedAquifer => {
                self.soil.head
            }
            NeighborEndpoint::MeshAquifer => self.aquifer.head,
            _ => self.soil.head,
        }
    }

    /// Water that lateral outflows on `endpoint` may draw this step (m of
    /// water).
    pub fn available(&self, endpoint: NeighborEndpoint) -> f64 {
        match endpoint {
            NeighborEndpoint::MeshSoil => match self.mode {
                GroundwaterMode::UnsaturatedAquifer => 0.0,
                _ => self.soil.storage(),
            },
            NeighborEndpoint::MeshAquifer => self.aquifer.storage(),
            _ => 0.0,
        }
    }

    /// Add lateral exchange on `endpoint` to the matching layer's scratch.
    pub fn add_lateral(&mut self, endpoint: NeighborEndpoint, water: f64) {
        match endpoint {
            NeighborEndpoint::MeshSoil => self.soil.recharge += water,
            NeighborEndpoint::MeshAquifer => self.aquifer.recharge += water,
            _ => {}
        }
    }

    /// Add vertical recharge from the vadose zone to whichever layer holds
    /// the water table. Returns what no layer could take.
    pub fn add_vertical(&mut self, water: f64) -> f64 {
        match self.mode {
            GroundwaterMode::SaturatedAquifer | GroundwaterMode::PerchedWaterTable => {
                self.soil.recharge += water;
            }
            GroundwaterMode::UnsaturatedAquifer => self.aquifer.recharge += water,
            GroundwaterMode::NoMultilayer => {
                if self.soil.exists {
                    self.soil.recharge += water;
                } else if self.aquifer.exists {
                    self.aquifer.recharge += water;
                } else {
                    return water;
                }
            }
        }
        0.0
    }

    /// Total saturated storage (m of water).
    pub fn storage(&self) -> f64 {
        self.soil.storage() + self.aquifer.storage()
    }

    /// Sum of both layers' ledgers (m³).
    pub fn water_created(&self) -> f64 {
        self.soil.water_created + self.aquifer.water_created
    }

    /// Book `volume` (m³) created while drawing lateral outflow on
    /// `endpoint`.
    pub fn book_created(&mut self, endpoint: NeighborEndpoint, volume: f64) {
        match endpoint {
            NeighborEndpoint::MeshAquifer => self.aquifer.water_created += volume,
            _ => self.soil.water_created += volume,
        }
    }

    /// Zero both ledgers.
    pub fn reset_water_created(&mut self) {
        self.soil.water_created = 0.0;
        self.aquifer.water_created = 0.0;
    }

    /// Fold both recharge scratches into heads, changing mode as needed.
    ///
    /// `area` converts shortfalls to ledger volumes, `dt` bounds
    /// percolation and leakage into the aquifer, and water rising above
    /// the ground is added to `surface_excess` (m of water).
    pub fn resolve(
        &mut self,
        element: ElementId,
        area: f64,
        dt: f64,
        surface_excess: &mut f64,
    ) -> Result<(), InvariantError> {
        let start = self.mode;
        let mut settled = false;
        for _ in 0..MAX_TRANSITIONS {
            let step = match self.mode {
                GroundwaterMode::SaturatedAquifer => self.resolve_saturated(surface_excess),
                GroundwaterMode::UnsaturatedAquifer => {
                    self.resolve_unsaturated(area, dt, surface_excess)
                }
                GroundwaterMode::PerchedWaterTable => self.resolve_perched(area, dt, surface_excess),
                GroundwaterMode::NoMultilayer => self.resolve_single(area, surface_excess),
            };
            if let Step::Done = step {
                settled = true;
                break;
            }
        }
        if !settled {
            return Err(InvariantError::IllegalGroundwaterMode {
                element,
                reason: format!("did not settle after {MAX_TRANSITIONS} transitions"),
            });
        }
        if self.mode != start {
            tracing::debug!(element = %element, from = %start, to = %self.mode, "groundwater mode change");
        }
        self.check_resolved(element)?;
        self.check_mode(element)
    }

    fn resolve_saturated(&mut self, surface_excess: &mut f64) -> Step {
        let total = take(&mut self.soil.recharge) + take(&mut self.aquifer.recharge);
        let head = self.soil.head + total / self.soil.porosity;
        if head > self.soil.top {
            *surface_excess += (head - self.soil.top) * self.soil.porosity;
            self.soil.head = self.soil.top;
            Step::Done
        } else if head >= self.soil.bottom {
            self.soil.head = head;
            Step::Done
        } else {
            // The soil has drained; the rest of the loss comes out of the aquifer.
            let deficit = (self.soil.bottom - head) * self.soil.porosity;
            self.soil.head = self.soil.bottom;
            self.aquifer.head = self.aquifer.top;
            self.aquifer.recharge = -deficit;
            self.mode = GroundwaterMode::UnsaturatedAquifer;
            Step::Continue
        }
    }

    fn resolve_unsaturated(&mut self, area: f64, dt: f64, surface_excess: &mut f64) -> Step {
        let soil_in = take(&mut self.soil.recharge);
        let percolation = self.aquifer.conductivity * dt;
        let perched = if soil_in > percolation {
            self.aquifer.recharge += percolation;
            soil_in - percolation
        } else {
            self.aquifer.recharge += soil_in;
            0.0
        };
        let head = self.aquifer.head + take(&mut self.aquifer.recharge) / self.aquifer.porosity;
        if head > self.aquifer.top {
            let overflow = (head - self.aquifer.top) * self.aquifer.porosity;
            self.aquifer.head = self.aquifer.top;
            self.soil.head = self.soil.bottom;
            self.soil.recharge = overflow + perched;
            self.mode = GroundwaterMode::SaturatedAquifer;
            return Step::Continue;
        }
        if head < self.aquifer.bottom {
            self.aquifer.water_created += (self.aquifer.bottom - head) * self.aquifer.porosity * area;
            self.aquifer.head = self.aquifer.bottom;
        } else {
            self.aquifer.head = head;
        }
        if perched > 0.0 {
            // Perched water stands on the soil bottom (aquifer top <= soil bottom).
            self.soil.head = self.soil.bottom;
            self.soil.apply(perched, area, surface_excess);
            self.mode = GroundwaterMode::PerchedWaterTable;
        }
        Step::Done
    }

    fn resolve_perched(&mut self, area: f64, dt: f64, surface_excess: &mut f64) -> Step {
        let mut head = self.soil.head + take(&mut self.soil.recharge) / self.soil.porosity;
        if head > self.soil.top {
            *surface_excess += (head - self.soil.top) * self.soil.porosity;
            head = self.soil.top;
        }
        let perched = (head - self.soil.bottom) * self.soil.porosity;
        if perched <= 0.0 {
            // Perched water exhausted; the shortfall comes from the aquifer.
            self.soil.head = self.soil.bottom;
            self.aquifer.recharge += perched;
            self.mode = GroundwaterMode::UnsaturatedAquifer;
            return Step::Continue;
        }
        let leak = perched.min(self.aquifer.conductivity * dt);
        self.soil.head = if leak >= perched {
            self.soil.bottom
        } else {
            (head - leak / self.soil.porosity).max(self.soil.bottom)
        };
        let aquifer_in = take(&mut self.aquifer.recharge) + leak;
        let aquifer_head = self.aquifer.head + aquifer_in / self.aquifer.porosity;
        if aquifer_head > self.aquifer.top {
            // Aquifer full: the perched zone joins it.
            self.aquifer.head = self.aquifer.top;
            self.soil.recharge = (aquifer_head - self.aquifer.top) * self.aquifer.porosity;
            self.mode = GroundwaterMode::SaturatedAquifer;
            return Step::Continue;
        }
        if aquifer_head < self.aquifer.bottom {
            self.aquifer.water_created +=
                (self.aquifer.bottom - aquifer_head) * self.aquifer.porosity * area;
            self.aquifer.head = self.aquifer.bottom;
        } else {
            self.aquifer.head = aquifer_head;
        }
        if self.soil.head <= self.soil.bottom {
            self.mode = GroundwaterMode::UnsaturatedAquifer;
        }
        Step::Done
    }

    fn resolve_single(&mut self, area: f64, surface_excess: &mut f64) -> Step {
        let total = take(&mut self.soil.recharge) + take(&mut self.aquifer.recharge);
        if let Some(layer) = self.single_mut() {
            layer.apply(total, area, surface_excess);
        } else {
            *surface_excess += total;
        }
        Step::Done
    }

    fn single(&self) -> Option<&LayerState> {
        if self.soil.exists {
            Some(&self.soil)
        } else if self.aquifer.exists {
            Some(&self.aquifer)
        } else {
            None
        }
    }

    fn single_mut(&mut self) -> Option<&mut LayerState> {
        if self.soil.exists {
            Some(&mut self.soil)
        } else if self.aquifer.exists {
            Some(&mut self.aquifer)
        } else {
            None
        }
    }

    /// Both recharge scratches must be exactly zero.
    pub fn check_resolved(&self, element: ElementId) -> Result<(), InvariantError> {
        for (layer, state) in [("soil", &self.soil), ("aquifer", &self.aquifer)] {
            if state.recharge != 0.0 {
                return Err(InvariantError::UnresolvedRecharge {
                    element,
                    layer,
                    value: state.recharge,
                });
            }
        }
        Ok(())
    }

    /// The mode must be legal for the layers present, and heads must lie
    /// inside their layers.
    pub fn check_mode(&self, element: ElementId) -> Result<(), InvariantError> {
        let illegal = |reason: String| InvariantError::IllegalGroundwaterMode { element, reason };
        let both = self.soil.exists && self.aquifer.exists;
        if both == (self.mode == GroundwaterMode::NoMultilayer) {
            return Err(illegal(format!(
                "{} with soil={} aquifer={}",
                self.mode, self.soil.exists, self.aquifer.exists
            )));
        }
        for (name, layer) in [("soil", &self.soil), ("aquifer", &self.aquifer)] {
            if layer.exists && !(layer.bottom <= layer.head && layer.head <= layer.top) {
                return Err(illegal(format!(
                    "{name} head {} outside [{}, {}]",
                    layer.head, layer.bottom, layer.top
                )));
            }
        }
        match self.mode {
            GroundwaterMode::SaturatedAquifer if self.aquifer.head != self.aquifer.top => Err(
                illegal(format!("{} with aquifer head below top", self.mode)),
            ),
            GroundwaterMode::UnsaturatedAquifer if self.soil.head != self.soil.bottom => {
                Err(illegal(format!("{} with water in the soil", self.mode)))
            }
            _ => Ok(()),
        }
    }
}

// ── Codec ───────────────────────────────────────────────────────

impl Encode for GroundwaterMode {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        write_u8(
            w,
            match self {
                Self::SaturatedAquifer => 0,
                Self::UnsaturatedAquifer => 1,
                Self::PerchedWaterTable => 2,
                Self::NoMultilayer => 3,
            },
        )
    }
}

impl Decode for GroundwaterMode {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        match read_u8(r)? {
            0 => Ok(Self::SaturatedAquifer),
            1 => Ok(Self::UnsaturatedAquifer),
            2 => Ok(Self::PerchedWaterTable),
            3 => Ok(Self::NoMultilayer),
            tag => Err(CodecError::UnknownTag {
                what: "groundwater mode",
                tag,
            }),
        }
    }
}

impl Encode for LayerState {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.exists.encode(w)?;
        for v in [
            self.bottom,
            self.top,
            self.porosity,
            self.conductivity,
            self.head,
            self.recharge,
            self.water_created,
        ] {
            write_f64_le(w, v)?;
        }
        Ok(())
    }
}

impl Decode for LayerState {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            exists: bool::decode(r)?,
            bottom: read_f64_le(r)?,
            top: read_f64_le(r)?,
            porosity: read_f64_le(r)?,
            conductivity: read_f64_le(r)?,
            head: read_f64_le(r)?,
            recharge: read_f64_le(r)?,
            water_created: read_f64_le(r)?,
        })
    }
}

impl Encode for Groundwater {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.mode.encode(w)?;
        self.soil.encode(w)?;
        self.aquifer.encode(w)
    }
}

impl Decode for Groundwater {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            mode: GroundwaterMode::decode(r)?,
            soil: LayerState::decode(r)?,
            aquifer: LayerState::decode(r)?,
        })
    }
}
