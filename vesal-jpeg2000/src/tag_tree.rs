//! The tag tree, described in Section B.10.2.
//!
//! Tag trees are quad trees where each leaf stores an integer value and
//! each intermediate node stores the smallest value of all of its
//! children. The coded bit sequence reveals, per queried leaf, just
//! enough of the tree to decide whether the leaf value lies below a
//! threshold; state is retained so repeated queries never repeat bits.

use crate::reader::BitReader;
use crate::writer::BitWriter;
use log::warn;

#[derive(Debug, PartialEq, Eq, Clone, Default)]
struct TagNode {
    /// The width of the area covered by the node. A width of 0 marks a
    /// dummy node that doesn't actually "exist".
    width: u32,
    /// The height of the area covered by the node.
    height: u32,
    /// The value stored in the node. On the decoding side this is only
    /// final once `known` is set; on the encoding side it is preset.
    value: u32,
    /// Decoding: whether the value has been fully read. Encoding: whether
    /// the value has been signalled in the bit stream.
    known: bool,
    /// The threshold up to which this node has been coded so far
    /// (encoding side only).
    low: u32,
    /// The level inside the tree. Zero indicates a leaf node; the root
    /// has the highest level.
    level: u16,
    /// The indices of the children, `usize::MAX` marking dummy nodes.
    children: [usize; 4],
}

impl TagNode {
    fn new(width: u32, height: u32, level: u16) -> Self {
        Self {
            width,
            height,
            level,
            value: 0,
            known: false,
            low: 0,
            children: [usize::MAX; 4],
        }
    }

    /// The width of the top-left child.
    fn top_left_width(&self) -> u32 {
        u32::min(1 << (self.level - 1), self.width)
    }

    /// The height of the top-left child.
    fn top_left_height(&self) -> u32 {
        u32::min(1 << (self.level - 1), self.height)
    }

    fn build(width: u32, height: u32, level: u16, nodes: &mut Vec<TagNode>) -> Self {
        let mut tag = TagNode::new(width, height, level);

        if level == 0 {
            // We reached a leaf node.
            debug_assert!(width <= 1 && height <= 1);

            return tag;
        }

        let top_left_width = tag.top_left_width();
        let top_left_height = tag.top_left_height();

        let mut push = |node: TagNode, child_idx: usize, nodes: &mut Vec<TagNode>| {
            if node.width > 0 && node.height > 0 {
                let node_idx = nodes.len();
                nodes.push(node);
                tag.children[child_idx] = node_idx;
            }
        };

        let n1 = TagNode::build(top_left_width, top_left_height, level - 1, nodes);
        push(n1, 0, nodes);

        let n2 = TagNode::build(width - top_left_width, top_left_height, level - 1, nodes);
        push(n2, 1, nodes);

        let n3 = TagNode::build(top_left_width, height - top_left_height, level - 1, nodes);
        push(n3, 2, nodes);

        let n4 = TagNode::build(
            width - top_left_width,
            height - top_left_height,
            level - 1,
            nodes,
        );
        push(n4, 3, nodes);

        tag
    }

    /// The index of the child covering `(x, y)`, together with the
    /// coordinates relative to that child.
    fn descend(&self, x: u32, y: u32) -> (usize, u32, u32) {
        let top_left_width = self.top_left_width();
        let top_left_height = self.top_left_height();

        match (x < top_left_width, y < top_left_height) {
            (true, true) => (self.children[0], x, y),
            (false, true) => (self.children[1], x - top_left_width, y),
            (true, false) => (self.children[2], x, y - top_left_height),
            (false, false) => (self.children[3], x - top_left_width, y - top_left_height),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TagTree {
    root: usize,
    width: u32,
    height: u32,
    nodes: Vec<TagNode>,
}

impl TagTree {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        // Calculate how many levels the tree has in total.
        let level = u32::max(
            width.max(1).next_power_of_two().ilog2(),
            height.max(1).next_power_of_two().ilog2(),
        );

        let mut nodes = Vec::new();
        let node = TagNode::build(width, height, level as u16, &mut nodes);
        let root = nodes.len();
        nodes.push(node);

        Self {
            root,
            width,
            height,
            nodes,
        }
    }

    /// Set the value of the leaf at `(x, y)`. Must be called for every
    /// leaf before encoding; interior minima are derived afterwards.
    pub(crate) fn set_value(&mut self, x: u32, y: u32, value: u32) {
        debug_assert!(x < self.width && y < self.height);

        let mut idx = self.root;
        let (mut x, mut y) = (x, y);

        while self.nodes[idx].level > 0 {
            (idx, x, y) = self.nodes[idx].descend(x, y);
        }

        self.nodes[idx].value = value;
    }

    /// Derive interior node values as the minimum over their children.
    /// Children precede their parents in the arena, so a single forward
    /// sweep resolves leaves before the nodes that depend on them.
    pub(crate) fn finish_values(&mut self) {
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].level == 0 {
                continue;
            }

            let min = self.nodes[idx]
                .children
                .iter()
                .filter(|&&c| c != usize::MAX)
                .map(|&c| self.nodes[c].value)
                .min()
                .unwrap_or(0);

            self.nodes[idx].value = min;
        }
    }

    /// Code the bits that let a decoder determine whether the value of the
    /// leaf at `(x, y)` is below `threshold` (and, if so, the value
    /// itself).
    pub(crate) fn encode(&mut self, x: u32, y: u32, writer: &mut BitWriter, threshold: u32) {
        debug_assert!(x < self.width && y < self.height);

        let mut idx = self.root;
        let (mut x, mut y) = (x, y);
        let mut low = 0;

        loop {
            let node = &mut self.nodes[idx];

            if low > node.low {
                node.low = low;
            } else {
                low = node.low;
            }

            while low < threshold {
                if low >= node.value {
                    if !node.known {
                        writer.write_bit(1);
                        node.known = true;
                    }
                    break;
                }

                writer.write_bit(0);
                low += 1;
            }

            node.low = low;

            if node.level == 0 || !node.known || low >= threshold {
                break;
            }

            (idx, x, y) = self.nodes[idx].descend(x, y);
        }
    }

    /// The reading counterpart of [`TagTree::encode`]. Returns the leaf
    /// value, or `max_val` if coding stopped at the threshold.
    pub(crate) fn read(
        &mut self,
        x: u32,
        y: u32,
        reader: &mut BitReader<'_>,
        max_val: u32,
    ) -> Option<u32> {
        if x >= self.width || y >= self.height {
            warn!(
                "attempted to read invalid index x: {x}, y: {y} in tag \
                tree with dimensions {}x{}",
                self.width, self.height
            );

            return None;
        }

        self.read_node(self.root, x, y, reader, 0, max_val)
    }

    fn read_node(
        &mut self,
        node_idx: usize,
        x: u32,
        y: u32,
        reader: &mut BitReader<'_>,
        parent_val: u32,
        max_val: u32,
    ) -> Option<u32> {
        let node = &mut self.nodes[node_idx];

        if !node.known {
            let mut val = u32::max(parent_val, node.value);

            loop {
                if val >= max_val {
                    break;
                }

                // A 0 bit means the minimum is larger than the current
                // value, a 1 bit means it is equal to it.
                match reader.read_bits(1)? {
                    0 => val += 1,
                    1 => {
                        node.known = true;
                        break;
                    }
                    _ => unreachable!(),
                }
            }

            node.value = val;
        }

        // Abort early if we already reached the leaf node or the minimum
        // value of all children is too large.
        if node.value >= max_val || node.level == 0 {
            return Some(node.value);
        }

        let value = node.value;
        let (child, cx, cy) = node.descend(x, y);

        self.read_node(child, cx, cy, reader, value, max_val)
    }
}
