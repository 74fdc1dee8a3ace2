//! Immutable physical descriptions exchanged once at initialization.

/// Trapezoidal channel cross-section.
///
/// `side_slope` is horizontal run per unit rise on each bank; zero gives a
/// rectangular channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelShape {
    /// Width of the channel bed (m).
    pub base_width: f64,
    /// Bank side slope (m horizontal per m vertical).
    pub side_slope: f64,
    /// Depth at which the channel overtops its banks (m).
    pub bank_full_depth: f64,
}

impl ChannelShape {
    /// Validate that the shape describes a channel that can hold water.
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_width.is_finite() || self.base_width < 0.0 {
            return Err(format!("base_width must be finite and >= 0, got {}", self.base_width));
        }
        if !self.side_slope.is_finite() || self.side_slope < 0.0 {
            return Err(format!("side_slope must be finite and >= 0, got {}", self.side_slope));
        }
        if self.base_width == 0.0 && self.side_slope == 0.0 {
            return Err("base_width and side_slope cannot both be zero".to_string());
        }
        if !self.bank_full_depth.is_finite() || self.bank_full_depth <= 0.0 {
            return Err(format!(
                "bank_full_depth must be finite and > 0, got {}",
                self.bank_full_depth
            ));
        }
        Ok(())
    }

    /// Wetted cross-sectional area at `depth` (m²).
    pub fn area(&self, depth: f64) -> f64 {
        (self.base_width + self.side_slope * depth) * depth
    }

    /// Depth that holds cross-sectional `area` (m).
    ///
    /// Inverse of [`area`](Self::area): the positive root of
    /// `s·h² + b·h − A = 0`, with the rectangular case handled separately.
    pub fn depth(&self, area: f64) -> f64 {
        if area <= 0.0 {
            return 0.0;
        }
        if self.side_slope == 0.0 {
            area / self.base_width
        } else {
            let b = self.base_width;
            let s = self.side_slope;
            (-b + (b * b + 4.0 * s * area).sqrt()) / (2.0 * s)
        }
    }

    /// Wetted perimeter at `depth` (m).
    pub fn wetted_perimeter(&self, depth: f64) -> f64 {
        self.base_width + 2.0 * depth * (1.0 + self.side_slope * self.side_slope).sqrt()
    }

    /// Width of the free surface at `depth` (m).
    pub fn top_width(&self, depth: f64) -> f64 {
        self.base_width + 2.0 * self.side_slope * depth
    }
}

/// Snapshot of an element's geometry and hydraulic parameters.
///
/// Each side sends its own attributes to the other once, and the receiver
/// caches them in the edge proxy. They are never recomputed; the optional
/// full invariant pass compares the cached copy against what the neighbor
/// reports about itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NeighborAttributes {
    /// Centroid x (m).
    pub x: f64,
    /// Centroid y (m).
    pub y: f64,
    /// Surface elevation for mesh, bank elevation for channels (m).
    pub z_top: f64,
    /// Bottom of the deepest layer for mesh, bed elevation for channels (m).
    pub z_bottom: f64,
    /// Plan area for mesh (m²), link length for channels (m).
    pub area_or_length: f64,
    /// Manning's roughness coefficient.
    pub manning_n: f64,
    /// Saturated conductivity (m/s); bed conductivity for channels.
    pub conductivity: f64,
    /// Porosity for mesh, bed thickness for channels (m).
    pub porosity_or_bed_thickness: f64,
    /// Present only for channel elements.
    pub channel_shape: Option<ChannelShape>,
}

impl NeighborAttributes {
    /// Horizontal distance between two centroids (m).
    pub fn distance_to(&self, other: &NeighborAttributes) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Whether these attributes describe a channel.
    pub fn is_channel(&self) -> bool {
        self.channel_shape.is_some()
    }

    /// Check the numeric fields are usable by the flow calculation.
    pub fn validate(&self) -> Result<(), String> {
        let finite = [
            ("x", self.x),
            ("y", self.y),
            ("z_top", self.z_top),
            ("z_bottom", self.z_bottom),
        ];
        for (name, v) in finite {
            if !v.is_finite() {
                return Err(format!("{name} must be finite, got {v}"));
            }
        }
        if self.z_bottom > self.z_top {
            return Err(format!(
                "z_bottom ({}) is above z_top ({})",
                self.z_bottom, self.z_top
            ));
        }
        let positive = [
            ("area_or_length", self.area_or_length),
            ("manning_n", self.manning_n),
        ];
        for (name, v) in positive {
            if !v.is_finite() || v <= 0.0 {
                return Err(format!("{name} must be finite and > 0, got {v}"));
            }
        }
        let non_negative = [
            ("conductivity", self.conductivity),
            ("porosity_or_bed_thickness", self.porosity_or_bed_thickness),
        ];
        for (name, v) in non_negative {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("{name} must be finite and >= 0, got {v}"));
            }
        }
        if let Some(shape) = &self.channel_shape {
            shape.validate()?;
        }
        Ok(())
    }
}

/// Static per-edge geometry from the topology store.
///
/// Both sides of an edge hold the same `length` and `z_offset`; their
/// normals point in opposite directions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeGeometry {
    /// Length of the shared edge (m). For channel–mesh edges, the length of
    /// bank in contact with the mesh element.
    pub length: f64,
    /// Outward unit normal, x component.
    pub normal_x: f64,
    /// Outward unit normal, y component.
    pub normal_y: f64,
    /// Vertical offset applied to the channel bank when mesh water spills in (m).
    pub z_offset: f64,
}

impl EdgeGeometry {
    /// Geometry with only a length, used for one-way and reservoir edges.
    pub fn with_length(length: f64) -> Self {
        Self {
            length,
            normal_x: 0.0,
            normal_y: 0.0,
            z_offset: 0.0,
        }
    }

    /// The same edge as seen from the other side.
    pub fn reverse(&self) -> Self {
        Self {
            length: self.length,
            normal_x: -self.normal_x,
            normal_y: -self.normal_y,
            z_offset: self.z_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trapezoid() -> ChannelShape {
        ChannelShape {
            base_width: 2.0,
            side_slope: 1.5,
            bank_full_depth: 1.0,
        }
    }

    #[test]
    fn rectangular_depth_area_inverse() {
        let shape = ChannelShape {
            base_width: 3.0,
            side_slope: 0.0,
            bank_full_depth: 2.0,
        };
        assert_eq!(shape.area(0.5), 1.5);
        assert_eq!(shape.depth(1.5), 0.5);
    }

    #[test]
    fn trapezoid_depth_area_inverse() {
        let shape = trapezoid();
        for depth in [0.0, 0.01, 0.3, 1.0, 2.5] {
            let back = shape.depth(shape.area(depth));
            assert!((back - depth).abs() < 1e-12, "depth {depth} -> {back}");
        }
    }

    #[test]
    fn triangular_channel_allowed() {
        let shape = ChannelShape {
            base_width: 0.0,
            side_slope: 2.0,
            bank_full_depth: 1.0,
        };
        assert!(shape.validate().is_ok());
        assert!((shape.depth(shape.area(0.7)) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn degenerate_channel_rejected() {
        let shape = ChannelShape {
            base_width: 0.0,
            side_slope: 0.0,
            bank_full_depth: 1.0,
        };
        assert!(shape.validate().is_err());
    }

    #[test]
    fn inverted_layers_rejected() {
        let attrs = NeighborAttributes {
            x: 0.0,
            y: 0.0,
            z_top: 1.0,
            z_bottom: 2.0,
            area_or_length: 1.0,
            manning_n: 0.03,
            conductivity: 1e-5,
            porosity_or_bed_thickness: 0.4,
            channel_shape: None,
        };
        assert!(attrs.validate().unwrap_err().contains("z_bottom"));
    }

    #[test]
    fn geometry_reverse_flips_normal() {
        let g = EdgeGeometry {
            length: 10.0,
            normal_x: 0.6,
            normal_y: -0.8,
            z_offset: 0.1,
        };
        let r = g.reverse();
        assert_eq!(r.normal_x, -0.6);
        assert_eq!(r.normal_y, 0.8);
        assert_eq!(r.reverse(), g);
    }
}
