//! Packet sequencing for the progression orders of Table A.16.
//!
//! With one precinct per resolution the position dimension is
//! degenerate, so every order reduces to a walk over (layer, resolution,
//! component) tuples.

use crate::codestream::ProgressionOrder;

/// The coordinates of one packet in the codestream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PacketSlot {
    pub(crate) layer: u16,
    pub(crate) resolution: u8,
    pub(crate) component: u16,
}

/// The full packet sequence for the given progression order.
pub(crate) fn packet_sequence(
    order: ProgressionOrder,
    layers: u16,
    resolutions: u8,
    components: u16,
) -> Vec<PacketSlot> {
    match order {
        ProgressionOrder::Lrcp => layer_resolution_component_sequence(layers, resolutions, components),
        ProgressionOrder::Rlcp => resolution_layer_component_sequence(layers, resolutions, components),
        ProgressionOrder::Rpcl => resolution_component_layer_sequence(layers, resolutions, components),
        // With a single precinct, the position-first and component-first
        // orders walk identically.
        ProgressionOrder::Pcrl | ProgressionOrder::Cprl => {
            component_resolution_layer_sequence(layers, resolutions, components)
        }
    }
}

fn layer_resolution_component_sequence(
    layers: u16,
    resolutions: u8,
    components: u16,
) -> Vec<PacketSlot> {
    let mut sequence = Vec::new();

    for layer in 0..layers {
        for resolution in 0..resolutions {
            for component in 0..components {
                sequence.push(PacketSlot {
                    layer,
                    resolution,
                    component,
                });
            }
        }
    }

    sequence
}

fn resolution_layer_component_sequence(
    layers: u16,
    resolutions: u8,
    components: u16,
) -> Vec<PacketSlot> {
    let mut sequence = Vec::new();

    for resolution in 0..resolutions {
        for layer in 0..layers {
            for component in 0..components {
                sequence.push(PacketSlot {
                    layer,
                    resolution,
                    component,
                });
            }
        }
    }

    sequence
}

fn resolution_component_layer_sequence(
    layers: u16,
    resolutions: u8,
    components: u16,
) -> Vec<PacketSlot> {
    let mut sequence = Vec::new();

    for resolution in 0..resolutions {
        for component in 0..components {
            for layer in 0..layers {
                sequence.push(PacketSlot {
                    layer,
                    resolution,
                    component,
                });
            }
        }
    }

    sequence
}

fn component_resolution_layer_sequence(
    layers: u16,
    resolutions: u8,
    components: u16,
) -> Vec<PacketSlot> {
    let mut sequence = Vec::new();

    for component in 0..components {
        for resolution in 0..resolutions {
            for layer in 0..layers {
                sequence.push(PacketSlot {
                    layer,
                    resolution,
                    component,
                });
            }
        }
    }

    sequence
}

#[cfg(test)]
mod tests {
    use super::{PacketSlot, packet_sequence};
    use crate::codestream::ProgressionOrder;

    #[test]
    fn sequence_lengths() {
        for order in [
            ProgressionOrder::Lrcp,
            ProgressionOrder::Rlcp,
            ProgressionOrder::Rpcl,
            ProgressionOrder::Pcrl,
            ProgressionOrder::Cprl,
        ] {
            assert_eq!(packet_sequence(order, 2, 4, 3).len(), 2 * 4 * 3);
        }
    }

    #[test]
    fn lrcp_walk() {
        let sequence = packet_sequence(ProgressionOrder::Lrcp, 1, 2, 2);

        assert_eq!(
            sequence,
            vec![
                PacketSlot { layer: 0, resolution: 0, component: 0 },
                PacketSlot { layer: 0, resolution: 0, component: 1 },
                PacketSlot { layer: 0, resolution: 1, component: 0 },
                PacketSlot { layer: 0, resolution: 1, component: 1 },
            ]
        );
    }

    #[test]
    fn rlcp_resolution_is_outermost() {
        let sequence = packet_sequence(ProgressionOrder::Rlcp, 2, 2, 1);

        assert_eq!(
            sequence.iter().map(|s| s.resolution).collect::<Vec<_>>(),
            vec![0, 0, 1, 1]
        );
        assert_eq!(
            sequence.iter().map(|s| s.layer).collect::<Vec<_>>(),
            vec![0, 1, 0, 1]
        );
    }
}
