//! Channel elements: one trapezoidal reach.

use std::io::{Read, Write};

use indexmap::IndexMap;

use runnel_core::codec::{read_f64_le, write_f64_le, Decode, Encode};
use runnel_core::{
    ChannelShape, CodecError, ElementId, InvariantError, NeighborAttributes, NeighborConnection,
    NeighborEndpoint, TopologyError,
};
use runnel_neighbor::{CumulativeFlow, Envelope, NeighborProxy};

use crate::element::StepContext;
use crate::forcing::Forcing;
use crate::rationing::emit_rationed_outflows;

/// Static description of a channel reach.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelParameters {
    /// Reach midpoint x (m).
    pub x: f64,
    /// Reach midpoint y (m).
    pub y: f64,
    /// Bank elevation (m).
    pub bank: f64,
    /// Bed elevation (m).
    pub bed: f64,
    /// Reach length (m).
    pub length: f64,
    /// Manning's n.
    pub manning_n: f64,
    /// Cross-section.
    pub shape: ChannelShape,
    /// Bed conductivity (m/s).
    pub bed_conductivity: f64,
    /// Bed thickness (m).
    pub bed_thickness: f64,
}

/// A channel reach and its edges.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelElement {
    pub(crate) id: ElementId,
    pub(crate) attributes: NeighborAttributes,
    shape: ChannelShape,
    // m³
    water: f64,
    forcing: Forcing,
    surfacewater_created: f64,
    precipitation: CumulativeFlow,
    evaporation: CumulativeFlow,
    pub(crate) proxies: IndexMap<NeighborConnection, NeighborProxy>,
}

impl ChannelElement {
    /// Build a reach with no edges holding water to `depth`.
    pub fn new(
        id: ElementId,
        params: &ChannelParameters,
        depth: f64,
    ) -> Result<Self, TopologyError> {
        let invalid = |reason: String| TopologyError::InvalidParameter {
            element: id,
            reason,
        };
        let attributes = NeighborAttributes {
            x: params.x,
            y: params.y,
            z_top: params.bank,
            z_bottom: params.bed,
            area_or_length: params.length,
            manning_n: params.manning_n,
            conductivity: params.bed_conductivity,
            porosity_or_bed_thickness: params.bed_thickness,
            channel_shape: Some(params.shape),
        };
        attributes.validate().map_err(invalid)?;
        if !(depth >= 0.0) {
            return Err(invalid(format!("initial depth {depth} is negative")));
        }
        Ok(Self {
            id,
            attributes,
            shape: params.shape,
            water: params.shape.area(depth) * params.length,
            forcing: Forcing::default(),
            surfacewater_created: 0.0,
            precipitation: CumulativeFlow::new(),
            evaporation: CumulativeFlow::new(),
            proxies: IndexMap::new(),
        })
    }

    fn length(&self) -> f64 {
        self.attributes.area_or_length
    }

    /// Cross-section.
    pub fn shape(&self) -> &ChannelShape {
        &self.shape
    }

    /// Stored volume (m³).
    pub fn water(&self) -> f64 {
        self.water
    }

    /// Water depth (m).
    pub fn depth(&self) -> f64 {
        self.shape.depth(self.water / self.length())
    }

    /// Volume held at bank-full depth (m³).
    pub fn bank_full_volume(&self) -> f64 {
        self.shape.area(self.shape.bank_full_depth) * self.length()
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
        endpoint.is_channel_local()
    }

    /// Level offered to neighbors on every endpoint.
    pub fn level(&self, _endpoint: NeighborEndpoint) -> f64 {
        self.depth()
    }

    /// Every drop held by the element (m³).
    pub fn total_water(&self) -> f64 {
        self.water
    }

    /// Water created from nothing so far (m³). Negative means destroyed.
    pub fn water_created(&self) -> f64 {
        self.surfacewater_created
    }

    pub(crate) fn reset_water_created(&mut self) {
        self.surfacewater_created = 0.0;
    }

    /// Precipitation received so far (m³).
    pub fn precipitation(&self) -> f64 {
        self.precipitation.total()
    }

    /// Evaporation so far (m³).
    pub fn evaporation(&self) -> f64 {
        self.evaporation.total()
    }

    pub(crate) fn reset_atmosphere(&mut self) {
        self.precipitation.reset();
        self.evaporation.reset();
    }

    pub(crate) fn point_process(
        &mut self,
        _ctx: &StepContext<'_>,
        now: f64,
        end: f64,
        out: &mut Vec<Envelope>,
    ) -> Result<usize, InvariantError> {
        let dt = end - now;
        // Rain and evaporation act on the free surface, or on the bed
        // width when the channel is dry.
        let width = self.shape.top_width(self.depth()).max(self.shape.base_width);
        let surface = width * self.length();
        let rain = self.forcing.precipitation.max(0.0) * dt * surface;
        self.water += rain;
        self.precipitation.add(rain);
        let evaporation =
            (self.forcing.potential_evaporation.max(0.0) * dt * surface).min(self.water);
        self.water -= evaporation;
        self.evaporation.add(evaporation);

        let emission = emit_rationed_outflows(
            &mut self.proxies,
            NeighborEndpoint::is_channel_local,
            self.water,
            now,
            end,
            out,
        )?;
        self.water = emission.ration.remaining;
        self.surfacewater_created += emission.created;
        Ok(usize::from(emission.rationed))
    }

    pub(crate) fn receive_inflows(
        &mut self,
        ctx: &StepContext<'_>,
        now: f64,
        end: f64,
    ) -> Result<(), InvariantError> {
        for proxy in self.proxies.values_mut() {
            self.water += proxy.receive_water(now, end);
        }
        if ctx.drain_down {
            let bank_full = self.bank_full_volume();
            if self.water > bank_full {
                self.surfacewater_created -= self.water - bank_full;
                self.water = bank_full;
            }
        }
        if !(self.water >= 0.0) {
            return Err(InvariantError::StateOutOfBounds {
                element: self.id,
                reason: format!("channel volume {}", self.water),
            });
        }
        Ok(())
    }
}

impl Encode for ChannelElement {
    fn encode(&self, w: &mut dyn Write) -> Result<(), CodecError> {
        self.id.encode(w)?;
        self.attributes.encode(w)?;
        write_f64_le(w, self.water)?;
        self.forcing.encode(w)?;
        write_f64_le(w, self.surfacewater_created)?;
        self.precipitation.encode(w)?;
        self.evaporation.encode(w)?;
        crate::element::encode_proxies(&self.proxies, w)
    }
}

impl Decode for ChannelElement {
    fn decode(r: &mut dyn Read) -> Result<Self, CodecError> {
        let id = ElementId::decode(r)?;
        let attributes = NeighborAttributes::decode(r)?;
        let Some(shape) = attributes.channel_shape else {
            return Err(CodecError::Malformed {
                detail: format!("channel {id} without a cross-section"),
            });
        };
        Ok(Self {
            id,
            attributes,
            shape,
            water: read_f64_le(r)?,
            forcing: Forcing::decode(r)?,
            surfacewater_created: read_f64_le(r)?,
            precipitation: CumulativeFlow::decode(r)?,
            evaporation: CumulativeFlow::decode(r)?,
            proxies: crate::element::decode_proxies(r)?,
        })
    }
}
