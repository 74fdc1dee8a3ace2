//! Mesh elements: land surface over a soil layer over an aquifer.
//!
//! Surface water is held as a volume (m³) so that transfers, which are
//! volumes, add without conversion. Groundwater is held as heads and
//! converted through the element area whenever water crosses an edge.

use std::io::{Read, Write};

use indexmap::IndexMap;

use runnel_core::codec::{read_f64_le, write_f64_le, Decode, Encode};
use runnel_core::{
    CodecError, ElementId, InvariantError, NeighborAttributes, NeighborConnection,
    NeighborEndpoint, TopologyError,
};
use runnel_neighbor::{CumulativeFlow, Envelope, NeighborProxy};

use crate::element::StepContext;
use crate::forcing::Forcing;
use crate::groundwater::{Groundwater, LayerState};
use crate::physics::{LandState, VadoseStore};
use crate::rationing::emit_rationed_outflows;

/// Static description of one groundwater layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerParameters {
    /// Bottom elevation (m).
    pub bottom: f64,
    /// Top elevation (m).
    pub top: f64,
    /// Specific yield.
    pub porosity: f64,
    /// Saturated conductivity (m/s).
    pub conductivity: f64,
}

/// Static description of a mesh element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshParameters {
    /// Centroid x (m).
    pub x: f64,
    /// Centroid y (m).
    pub y: f64,
    /// Ground-surface elevation (m).
    pub ground: f64,
    /// Plan area (m²).
    pub area: f64,
    /// Overland Manning's n.
    pub manning_n: f64,
    /// Soil layer, if any.
    pub soil: Option<LayerParameters>,
    /// Aquifer layer, if any.
    pub aquifer: Option<LayerParameters>,
    /// Drainable porosity of the unsaturated zone.
    pub vadose_porosity: f64,
}

/// Initial water in a mesh element.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeshInitialState {
    /// Ponded depth (m).
    pub surface_depth: f64,
    /// Soil water-table elevation (m); ignored without a soil layer.
    pub soil_head: f64,
    /// Aquifer water-table elevation (m); ignored without an aquifer.
    pub aquifer_head: f64,
    /// Unsaturated-zone water (m).
    pub vadose_water: f64,
    /// Canopy and snow stores.
    pub land: LandState,
}

/// A mesh element and its edges.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshElement {
    pub(crate) id: ElementId,
    pub(crate) attributes: NeighborAttributes,
    surface_water: f64,
    groundwater: Groundwater,
    vadose: VadoseStore,
    land: LandState,
    forcing: Forcing,
    surfacewater_created: f64,
    precipitation: CumulativeFlow,
    evaporation: CumulativeFlow,
    pub(crate) proxies: IndexMap<NeighborConnection, NeighborProxy>,
}

impl MeshElement {
    /// Build an element with no edges.
    pub fn new(
        id: ElementId,
        params: &MeshParameters,
        initial: &MeshInitialState,
    ) -> Result<Self, TopologyError> {
        let invalid = |reason: String| TopologyError::InvalidParameter {
            element: id,
            reason,
        };
        let layer = |p: &LayerParameters, head: f64| {
            LayerState::new(p.bottom, p.top, p.porosity, p.conductivity, head)
        };
        for p in params.soil.iter().chain(params.aquifer.iter()) {
            if p.top > params.ground {
                return Err(invalid(format!(
                    "layer top {} above ground {}",
                    p.top, params.ground
                )));
            }
        }
        let groundwater = Groundwater::new(
            params.soil.as_ref().map(|p| layer(p, initial.soil_head)),
            params.aquifer.as_ref().map(|p| layer(p, initial.aquifer_head)),
        )
        .map_err(invalid)?;
        let deepest = params.aquifer.or(params.soil);
        let attributes = NeighborAttributes {
            x: params.x,
            y: params.y,
            z_top: params.ground,
            z_bottom: deepest.map_or(params.ground, |l| l.bottom),
            area_or_length: params.area,
            manning_n: params.manning_n,
            conductivity: deepest.map_or(0.0, |l| l.conductivity),
            porosity_or_bed_thickness: deepest.map_or(0.0, |l| l.porosity),
            channel_shape: None,
        };
        attributes.validate().map_err(invalid)?;
        if !(initial.surface_depth >= 0.0) || !(initial.vadose_water >= 0.0) {
            return Err(invalid("negative initial water".to_string()));
        }
        Ok(Self {
            id,
            attributes,
            surface_water: initial.surface_depth * params.area,
            groundwater,
            vadose: VadoseStore {
                water: initial.vadose_water,
                porosity: params.vadose_porosity,
            },
            land: initial.land,
            forcing: Forcing::default(),
            surfacewater_created: 0.0,
            precipitation: CumulativeFlow::new(),
            evaporation: CumulativeFlow::new(),
            proxies: IndexMap::new(),
        })
    }

    fn area(&self) -> f64 {
        self.attributes.area_or_length
    }

    /// Ponded volume (m³).
    pub fn surface_water(&self) -> f64 {
        self.surface_water
    }

    /// Ponded depth (m).
    pub fn surface_depth(&self) -> f64 {
        self.surface_water / self.area()
    }

    /// Groundwater layers and mode.
    pub fn groundwater(&self) -> &Groundwater {
        &self.groundwater
    }

    /// Unsaturated-zone store.
    pub fn vadose(&self) -> &VadoseStore {
        &self.vadose
    }

    /// Canopy and snow stores.
    pub fn land(&self) -> &LandState {
        &self.land
    }

    /// Forcing in effect until the next sync point.
    pub fn forcing(&self) -> &Forcing {
        &self.forcing
    }

    pub(crate) fn set_forcing(&mut self, forcing: Forcing) {
        self.forcing = forcing;
    }

    /// Whether this element can own `endpoint` as a local endpoint.
    pub fn owns_endpoint(&self, endpoint: NeighborEndpoint) -> bool {
        match endpoint {
            NeighborEndpoint::MeshSurface => true,
            NeighborEndpoint::MeshSoil => self.groundwater.soil().exists,
            NeighborEndpoint::MeshAquifer => self.groundwater.aquifer().exists,
            _ => false,
        }
    }

    /// Level offered to neighbors on `endpoint`.
    pub fn level(&self, endpoint: NeighborEndpoint) -> f64 {
        match endpoint {
            NeighborEndpoint::MeshSoil | NeighborEndpoint::MeshAquifer => {
                self.groundwater.level(endpoint)
            }
            _ => self.surface_depth(),
        }
    }

    /// Every drop held by the element (m³).
    pub fn total_water(&self) -> f64 {
        let area = self.area();
        self.surface_water
            + (self.groundwater.storage() + self.vadose.water + self.land.total()) * area
    }

    /// Water created from nothing so far (m³). Negative means destroyed.
    pub fn water_created(&self) -> f64 {
        self.surfacewater_created + self.groundwater.water_created()
    }

    pub(crate) fn reset_water_created(&mut self) {
        self.surfacewater_created = 0.0;
        self.groundwater.reset_water_created();
    }

    /// Precipitation received so far (m³).
    pub fn precipitation(&self) -> f64 {
        self.precipitation.total()
    }

    /// Evaporation and transpiration so far (m³).
    pub fn evaporation(&self) -> f64 {
        self.evaporation.total()
    }

    pub(crate) fn reset_atmosphere(&mut self) {
        self.precipitation.reset();
        self.evaporation.reset();
    }

    /// Run the land surface and send every outflow for `[now, end)`.
    /// Returns how many containers had to ration.
    pub(crate) fn point_process(
        &mut self,
        ctx: &StepContext<'_>,
        now: f64,
        end: f64,
        out: &mut Vec<Envelope>,
    ) -> Result<usize, InvariantError> {
        self.groundwater.check_resolved(self.id)?;
        let dt = end - now;
        let area = self.area();

        let depth = self.surface_depth();
        let land = ctx
            .land_surface
            .step(&self.forcing, &mut self.land, depth, dt);
        self.precipitation
            .add(self.forcing.precipitation.max(0.0) * dt * area);
        self.evaporation
            .add((land.canopy_evaporation + land.snow_evaporation) * area);
        self.surfacewater_created += land.mass_error * area;
        self.surface_water += land.surface_add * area;
        let ground_evaporation =
            (land.ground_evaporation * area).clamp(0.0, self.surface_water.max(0.0));
        self.surface_water -= ground_evaporation;
        let transpiration = land.transpiration.clamp(0.0, self.vadose.water.max(0.0));
        self.vadose.water -= transpiration;
        self.evaporation
            .add(ground_evaporation + transpiration * area);

        let surface = emit_rationed_outflows(
            &mut self.proxies,
            |e| e == NeighborEndpoint::MeshSurface,
            self.surface_water,
            now,
            end,
            out,
        )?;
        self.surface_water = surface.ration.remaining;
        self.surfacewater_created += surface.created;
        let mut rationed = usize::from(surface.rationed);

        for endpoint in [NeighborEndpoint::MeshSoil, NeighborEndpoint::MeshAquifer] {
            if !self.owns_endpoint(endpoint) {
                continue;
            }
            let available = self.groundwater.available(endpoint) * area;
            let emission =
                emit_rationed_outflows(&mut self.proxies, |e| e == endpoint, available, now, end, out)?;
            let removed = available - emission.ration.remaining;
            self.groundwater.add_lateral(endpoint, -removed / area);
            self.groundwater.book_created(endpoint, emission.created);
            rationed += usize::from(emission.rationed);
        }
        Ok(rationed)
    }

    /// Drain inflows for `[now, end)`, then settle the vadose zone and
    /// groundwater.
    pub(crate) fn receive_inflows(
        &mut self,
        ctx: &StepContext<'_>,
        now: f64,
        end: f64,
    ) -> Result<(), InvariantError> {
        let dt = end - now;
        let area = self.area();
        for (connection, proxy) in self.proxies.iter_mut() {
            let amount = proxy.receive_water(now, end);
            match connection.local_endpoint {
                NeighborEndpoint::MeshSurface => self.surface_water += amount,
                e @ (NeighborEndpoint::MeshSoil | NeighborEndpoint::MeshAquifer) => {
                    self.groundwater.add_lateral(e, amount / area);
                }
                _ => {}
            }
        }

        let ground = self.attributes.z_top;
        let mut supply = self.surface_water / area;
        let water_table = self.groundwater.water_table(ground);
        let recharge = ctx
            .vadose
            .resolve(&mut supply, &mut self.vadose, water_table, ground, dt);
        self.surface_water = supply * area;
        let mut excess = self.groundwater.add_vertical(recharge);
        self.groundwater.resolve(self.id, area, dt, &mut excess)?;
        self.surface_water += excess * area;
        if self.surface_water < 0.0 {
            self.surfacewater_created -= self.surface_water;
            self.surface_water = 0.0;
        }
        self.groundwater.check_resolved(self.id)?;
        self.groundwater.check_mode(self.id)
    }
}

impl Encode for MeshElement {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.id.encode(w)?;
        self.attributes.encode(w)?;
        write_f64_le(w, self.surface_water)?;
        self.groundwater.encode(w)?;
        self.vadose.encode(w)?;
        self.land.encode(w)?;
        self.forcing.encode(w)?;
        write_f64_le(w, self.surfacewater_created)?;
        self.precipitation.encode(w)?;
        self.evaporation.encode(w)?;
        crate::element::encode_proxies(&self.proxies, w)
    }
}

impl Decode for MeshElement {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        Ok(Self {
            id: ElementId::decode(r)?,
            attributes: NeighborAttributes::decode(r)?,
            surface_water: read_f64_le(r)?,
            groundwater: Groundwater::decode(r)?,
            vadose: VadoseStore::decode(r)?,
            land: LandState::decode(r)?,
            forcing: Forcing::decode(r)?,
            surfacewater_created: read_f64_le(r)?,
            precipitation: CumulativeFlow::decode(r)?,
            evaporation: CumulativeFlow::decode(r)?,
            proxies: crate::element::decode_proxies(r)?,
        })
    }
}
