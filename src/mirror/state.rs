use std::collections::{BTreeMap, BTreeSet};

use super::attr::{AttrValue, Attribute, Rect, Rgba};
use crate::widget::WidgetId;

/// Dirty attributes and their current values, in attribute order.
pub type Delta = Vec<(Attribute, AttrValue)>;

/// Shadow copy of one widget's externally visible attributes.
///
/// Each attribute is dirty-tracked on its own. A setter marks the attribute
/// dirty only when the value actually changes, and [`StateMirror::flush`]
/// clears exactly the attributes it returns.
#[derive(Debug, Clone)]
pub struct StateMirror {
    id: WidgetId,
    values: BTreeMap<Attribute, AttrValue>,
    dirty: BTreeSet<Attribute>,
}

macro_rules! accessors {
    ($($getter:ident, $setter:ident, $attr:ident, $ty:ty, $variant:ident;)*) => {
        $(
            pub fn $getter(&self) -> Option<$ty> {
                match self.values.get(&Attribute::$attr) {
                    Some(AttrValue::$variant(value)) => Some(value.clone()),
                    _ => None,
                }
            }

            pub fn $setter(&mut self, value: $ty) -> bool {
                self.set(Attribute::$attr, AttrValue::$variant(value))
            }
        )*
    };
}

impl StateMirror {
    pub fn new(id: WidgetId) -> Self {
        Self {
            id,
            values: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> WidgetId {
        self.id
    }

    pub fn get(&self, attr: Attribute) -> Option<&AttrValue> {
        self.values.get(&attr)
    }

    /// Stores `value`; returns whether the attribute became dirty.
    ///
    /// Local-only attributes are stored but never dirtied.
    pub fn set(&mut self, attr: Attribute, value: AttrValue) -> bool {
        if self.values.get(&attr) == Some(&value) {
            return false;
        }
        self.values.insert(attr, value);
        if !attr.is_mirrored() {
            return false;
        }
        self.dirty.insert(attr);
        true
    }

    /// Forces `attr` into the next flush if it holds a mirrored value.
    pub fn mark_dirty(&mut self, attr: Attribute) -> bool {
        if attr.is_mirrored() && self.values.contains_key(&attr) {
            self.dirty.insert(attr);
            true
        } else {
            false
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty = self
            .values
            .keys()
            .copied()
            .filter(|attr| attr.is_mirrored())
            .collect();
    }

    pub fn is_dirty(&self, attr: Attribute) -> bool {
        self.dirty.contains(&attr)
    }

    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_attributes(&self) -> impl Iterator<Item = Attribute> + '_ {
        self.dirty.iter().copied()
    }

    /// Returns the dirty delta and clears exactly those attributes.
    pub fn flush(&mut self) -> Delta {
        std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|attr| self.values.get(&attr).map(|value| (attr, value.clone())))
            .collect()
    }

    /// Every mirrored value, clearing all dirtiness.
    pub fn flush_all(&mut self) -> Delta {
        self.dirty.clear();
        self.snapshot()
    }

    pub fn snapshot(&self) -> Delta {
        self.values
            .iter()
            .filter(|(attr, _)| attr.is_mirrored())
            .map(|(attr, value)| (*attr, value.clone()))
            .collect()
    }

    /// Re-marks the attributes of a delta that could not be delivered.
    pub fn requeue(&mut self, delta: &[(Attribute, AttrValue)]) {
        for (attr, _) in delta {
            self.mark_dirty(*attr);
        }
    }

    accessors! {
        text, set_text, Text, String, Text;
        tool_tip_text, set_tool_tip_text, ToolTipText, String, Text;
        bounds, set_bounds, Bounds, Rect, Bounds;
        background, set_background, Background, Rgba, Color;
        foreground, set_foreground, Foreground, Rgba, Color;
        enabled, set_enabled, Enabled, bool, Bool;
        visible, set_visible, Visible, bool, Bool;
        selection, set_selection, Selection, i64, Int;
        maximum, set_maximum, Maximum, i64, Int;
        minimum, set_minimum, Minimum, i64, Int;
        items, set_items, Items, Vec<String>, Strings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::ResourceId;

    fn mirror() -> StateMirror {
        StateMirror::new(WidgetId::new(1))
    }

    #[test]
    fn untouched_mirror_flushes_empty() {
        let mut mirror = mirror();
        assert!(mirror.flush().is_empty());
        mirror.set_text("hello".into());
        mirror.flush();
        assert!(mirror.flush().is_empty());
    }

    #[test]
    fn repeated_mutation_sends_latest_value_once() {
        let mut mirror = mirror();
        mirror.set_text("one".into());
        mirror.set_text("two".into());
        mirror.set_text("three".into());

        let delta = mirror.flush();
        assert_eq!(delta, vec![(Attribute::Text, AttrValue::Text("three".into()))]);
        assert!(mirror.flush().is_empty());
    }

    #[test]
    fn equal_value_does_not_dirty() {
        let mut mirror = mirror();
        assert!(mirror.set_enabled(true));
        mirror.flush();
        assert!(!mirror.set_enabled(true));
        assert!(!mirror.has_changes());
        assert!(mirror.set_enabled(false));
        assert!(mirror.is_dirty(Attribute::Enabled));
    }

    #[test]
    fn flush_clears_only_flushed_fields() {
        let mut mirror = mirror();
        mirror.set_text("label".into());
        let first = mirror.flush();
        mirror.set_bounds(Rect::new(0, 0, 10, 10));

        assert_eq!(first.len(), 1);
        assert_eq!(
            mirror.flush(),
            vec![(Attribute::Bounds, AttrValue::Bounds(Rect::new(0, 0, 10, 10)))]
        );
    }

    #[test]
    fn local_only_attributes_are_stored_not_flushed() {
        let mut mirror = mirror();
        assert!(!mirror.set(Attribute::Image, AttrValue::Resource(ResourceId(4))));
        assert_eq!(
            mirror.get(Attribute::Image),
            Some(&AttrValue::Resource(ResourceId(4)))
        );
        assert!(!mirror.mark_dirty(Attribute::Image));
        assert!(mirror.flush().is_empty());
        assert!(mirror.snapshot().is_empty());
    }

    #[test]
    fn requeue_restores_undelivered_delta() {
        let mut mirror = mirror();
        mirror.set_text("pending".into());
        mirror.set_visible(true);
        let delta = mirror.flush();
        mirror.requeue(&delta);
        assert_eq!(mirror.flush(), delta);
    }

    #[test]
    fn mark_all_dirty_resends_full_state() {
        let mut mirror = mirror();
        mirror.set_text("a".into());
        mirror.set_selection(3);
        mirror.flush();
        mirror.mark_all_dirty();
        assert_eq!(mirror.flush().len(), 2);
    }
}
