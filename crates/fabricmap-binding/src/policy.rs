//! Port event classification and segment translation.

use fabric_core::{FabricMapping, Segment};

use crate::context::PortContext;
use crate::error::BindingResult;

/// What a port update means for the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The port left its old host: retire the old host's mapping.
    Migrating,
    /// The port got bound on its host: provision the mapping.
    Binding,
    /// A host was assigned for the first time.
    HostAssigned,
    Ignored,
}

pub fn classify(ctx: &PortContext) -> EventKind {
    let (host, original_host) = (ctx.host(), ctx.original_host());

    let changed = matches!((host, original_host), (Some(h), Some(o)) if h != o);
    let dropped = !ctx.original_binding_levels.is_empty() && ctx.binding_levels.is_empty();
    if changed && dropped {
        return EventKind::Migrating;
    }

    let bound = ctx.original_binding_levels.is_empty() && !ctx.binding_levels.is_empty();
    if host.is_some() && host == original_host && bound {
        return EventKind::Binding;
    }

    if host.is_some() && original_host.is_none() {
        return EventKind::HostAssigned;
    }
    EventKind::Ignored
}

/// The fabric only handles networks whose first segment is ISID or VLAN.
pub fn is_supported_network(ctx: &PortContext) -> bool {
    ctx.network_segments
        .first()
        .and_then(|attrs| Segment::from_attrs(attrs).ok())
        .is_some_and(|segment| segment.is_fabric_managed())
}

/// Mapping implied by the bound segments of a port on `host`.
///
/// An ISID top segment takes physnet and VLAN from the bottom (dynamic VLAN)
/// segment. A VLAN top segment carries everything itself. Anything else has
/// no fabric mapping.
pub fn mapping_target(
    host: &str,
    top: Option<&fabric_core::SegmentAttrs>,
    bottom: Option<&fabric_core::SegmentAttrs>,
) -> BindingResult<Option<FabricMapping>> {
    let Some(top) = top else {
        return Ok(None);
    };
    match Segment::from_attrs(top)? {
        Segment::Isid { id: isid } => {
            let Some(bottom) = bottom else {
                return Ok(None);
            };
            match Segment::from_attrs(bottom)? {
                Segment::Vlan { physnet, id } => {
                    Ok(Some(FabricMapping::new(host, &physnet, id, Some(isid))))
                }
                _ => Ok(None),
            }
        }
        Segment::Vlan { physnet, id } => Ok(Some(FabricMapping::new(host, &physnet, id, None))),
        Segment::Other { .. } => Ok(None),
    }
}
