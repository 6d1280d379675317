//! Keyframe animation channels and the node that samples them.

use glam::DVec4;
use serde::{Deserialize, Serialize};

use crate::property::{Property, PropertyError, PropertyType, PropertyValue};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum AnimationError {
    #[error("animation node requires at least one channel")]
    NoChannels,
    #[error("channel '{0}' has no keyframes")]
    EmptyChannel(String),
    #[error("channel '{channel}' has {timestamps} timestamps but {keyframes} keyframes")]
    KeyframeCount {
        channel: String,
        timestamps: usize,
        keyframes: usize,
    },
    #[error("channel '{0}': timestamps must be finite and strictly increasing")]
    TimestampOrder(String),
    #[error("channel '{channel}': keyframe type {ty} cannot be animated")]
    UnsupportedType { channel: String, ty: PropertyType },
    #[error("channel '{0}': all keyframes must share one type")]
    MixedTypes(String),
    #[error("channel '{0}': cubic interpolation needs in and out tangents for every keyframe")]
    MissingTangents(String),
    #[error("channel '{0}': tangent type does not match keyframe type")]
    TangentType(String),
    #[error("channel '{0}': quaternion interpolation requires Vec4f keyframes")]
    QuaternionType(String),
    #[error("duplicate channel name '{0}'")]
    DuplicateChannel(String),
    #[error("channel name '{0}' is reserved")]
    ReservedName(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Step,
    Linear,
    Cubic,
    LinearQuaternion,
    CubicQuaternion,
}

impl Interpolation {
    fn is_cubic(self) -> bool {
        matches!(self, Self::Cubic | Self::CubicQuaternion)
    }

    fn is_quaternion(self) -> bool {
        matches!(self, Self::LinearQuaternion | Self::CubicQuaternion)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationChannel {
    pub name: String,
    pub timestamps: Vec<f32>,
    pub keyframes: Vec<PropertyValue>,
    pub tangents_in: Vec<PropertyValue>,
    pub tangents_out: Vec<PropertyValue>,
    pub interpolation: Interpolation,
}

impl AnimationChannel {
    pub fn new(
        name: impl Into<String>,
        timestamps: Vec<f32>,
        keyframes: Vec<PropertyValue>,
        interpolation: Interpolation,
    ) -> Self {
        Self {
            name: name.into(),
            timestamps,
            keyframes,
            tangents_in: Vec::new(),
            tangents_out: Vec::new(),
            interpolation,
        }
    }

    pub fn with_tangents(
        mut self,
        tangents_in: Vec<PropertyValue>,
        tangents_out: Vec<PropertyValue>,
    ) -> Self {
        self.tangents_in = tangents_in;
        self.tangents_out = tangents_out;
        self
    }

    /// Type of the channel's output property.
    pub fn value_type(&self) -> PropertyType {
        self.keyframes
            .first()
            .map(PropertyValue::property_type)
            .unwrap_or(PropertyType::Float)
    }

    pub fn duration(&self) -> f32 {
        match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), AnimationError> {
        let name = || self.name.clone();
        if self.timestamps.is_empty() || self.keyframes.is_empty() {
            return Err(AnimationError::EmptyChannel(name()));
        }
        if self.timestamps.len() != self.keyframes.len() {
            return Err(AnimationError::KeyframeCount {
                channel: name(),
                timestamps: self.timestamps.len(),
                keyframes: self.keyframes.len(),
            });
        }
        if self.timestamps.iter().any(|t| !t.is_finite())
            || self.timestamps.windows(2).any(|pair| pair[0] >= pair[1])
        {
            return Err(AnimationError::TimestampOrder(name()));
        }

        let ty = self.value_type();
        if !is_animatable(ty) {
            return Err(AnimationError::UnsupportedType { channel: name(), ty });
        }
        if self.keyframes.iter().any(|key| key.property_type() != ty) {
            return Err(AnimationError::MixedTypes(name()));
        }
        if self.interpolation.is_quaternion() && ty != PropertyType::Vec4f {
            return Err(AnimationError::QuaternionType(name()));
        }
        if self.interpolation.is_cubic() {
            if self.tangents_in.len() != self.keyframes.len()
                || self.tangents_out.len() != self.keyframes.len()
            {
                return Err(AnimationError::MissingTangents(name()));
            }
            if self
                .tangents_in
                .iter()
                .chain(&self.tangents_out)
                .any(|tangent| tangent.property_type() != ty)
            {
                return Err(AnimationError::TangentType(name()));
            }
        }
        Ok(())
    }

    /// Samples the channel at `progress` (timestamp units). Assumes a
    /// validated channel. NaN progress samples the first keyframe.
    pub fn sample(&self, progress: f32) -> PropertyValue {
        let ts = &self.timestamps;
        let last = ts.len() - 1;
        if ts.len() == 1 || progress.is_nan() || progress <= ts[0] {
            return self.keyframes[0].clone();
        }
        if progress >= ts[last] {
            return self.keyframes[last].clone();
        }

        let index = ts.partition_point(|&t| t <= progress) - 1;
        if self.interpolation == Interpolation::Step {
            return self.keyframes[index].clone();
        }

        let span = f64::from(ts[index + 1]) - f64::from(ts[index]);
        let t = (f64::from(progress) - f64::from(ts[index])) / span;
        let p0 = self.keyframes[index].components();
        let p1 = self.keyframes[index + 1].components();

        let mut result: Vec<f64> = if self.interpolation.is_cubic() {
            let m0 = self.tangents_out[index].components();
            let m1 = self.tangents_in[index + 1].components();
            let t2 = t * t;
            let t3 = t2 * t;
            let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
            let h10 = t3 - 2.0 * t2 + t;
            let h01 = -2.0 * t3 + 3.0 * t2;
            let h11 = t3 - t2;
            (0..p0.len())
                .map(|c| h00 * p0[c] + h10 * span * m0[c] + h01 * p1[c] + h11 * span * m1[c])
                .collect()
        } else {
            p0.iter().zip(&p1).map(|(a, b)| a + (b - a) * t).collect()
        };

        if self.interpolation.is_quaternion() && result.len() == 4 {
            result = DVec4::from_slice(&result).normalize_or_zero().to_array().to_vec();
        }

        PropertyValue::from_components(self.value_type(), &result)
            .unwrap_or_else(|| self.keyframes[index].clone())
    }
}

fn is_animatable(ty: PropertyType) -> bool {
    matches!(
        ty,
        PropertyType::Float
            | PropertyType::Vec2f
            | PropertyType::Vec3f
            | PropertyType::Vec4f
            | PropertyType::Int32
            | PropertyType::Vec2i
            | PropertyType::Vec3i
            | PropertyType::Vec4i
    )
}

const DURATION: &str = "duration";

/// Samples every channel at the `progress` input and writes one output per
/// channel, plus the total `duration`.
#[derive(Debug, Clone)]
pub struct AnimationNode {
    channels: Vec<AnimationChannel>,
    duration: f32,
}

impl AnimationNode {
    pub fn new(channels: Vec<AnimationChannel>) -> Result<Self, AnimationError> {
        if channels.is_empty() {
            return Err(AnimationError::NoChannels);
        }
        for (index, channel) in channels.iter().enumerate() {
            channel.validate()?;
            if channel.name == DURATION || channel.name == "progress" {
                return Err(AnimationError::ReservedName(channel.name.clone()));
            }
            if channels[..index].iter().any(|other| other.name == channel.name) {
                return Err(AnimationError::DuplicateChannel(channel.name.clone()));
            }
        }
        let duration = channels
            .iter()
            .map(AnimationChannel::duration)
            .fold(0.0, f32::max);
        Ok(Self { channels, duration })
    }

    pub fn channels(&self) -> &[AnimationChannel] {
        &self.channels
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub(crate) fn interface(&self) -> (Property, Property) {
        let inputs = Property::new_struct("IN", vec![Property::new("progress", PropertyType::Float)]);
        let mut outputs = vec![Property::with_value(DURATION, self.duration)];
        outputs.extend(
            self.channels
                .iter()
                .map(|channel| Property::new(channel.name.clone(), channel.value_type())),
        );
        (inputs, Property::new_struct("OUT", outputs))
    }

    pub(crate) fn evaluate(
        &self,
        inputs: &Property,
        outputs: &mut Property,
    ) -> Result<bool, PropertyError> {
        let progress = inputs
            .child_at(0)
            .and_then(Property::get::<f32>)
            .unwrap_or(0.0);
        let mut changed = outputs.set_at(&[0], self.duration)?;
        for (index, channel) in self.channels.iter().enumerate() {
            changed |= outputs.set_at(&[index + 1], channel.sample(progress))?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{IVec2, Vec2, Vec4};

    fn rotation() -> AnimationChannel {
        AnimationChannel::new(
            "rotationZ",
            vec![0.0, 1.5],
            vec![PropertyValue::Float(0.0), PropertyValue::Float(360.0)],
            Interpolation::Linear,
        )
    }

    #[test]
    fn linear_channel_interpolates() {
        assert_eq!(rotation().sample(0.75), PropertyValue::Float(180.0));
    }

    #[test]
    fn progress_outside_range_clamps() {
        let channel = rotation();
        assert_eq!(channel.sample(-1.0), PropertyValue::Float(0.0));
        assert_eq!(channel.sample(10.0), PropertyValue::Float(360.0));
    }

    #[test]
    fn nan_progress_samples_first_keyframe() {
        assert_eq!(rotation().sample(f32::NAN), PropertyValue::Float(0.0));
    }

    #[test]
    fn large_integer_keyframes_keep_precision() {
        let channel = AnimationChannel::new(
            "ticks",
            vec![0.0, 1.0],
            vec![
                PropertyValue::Int32(100_000_001),
                PropertyValue::Int32(100_000_003),
            ],
            Interpolation::Linear,
        );
        assert_eq!(channel.sample(0.5), PropertyValue::Int32(100_000_002));
        assert_eq!(channel.sample(0.0), PropertyValue::Int32(100_000_001));
    }

    #[test]
    fn step_holds_previous_key() {
        let channel = AnimationChannel::new(
            "step",
            vec![0.0, 1.0, 2.0],
            vec![
                PropertyValue::Float(1.0),
                PropertyValue::Float(2.0),
                PropertyValue::Float(3.0),
            ],
            Interpolation::Step,
        );
        assert_eq!(channel.sample(0.99), PropertyValue::Float(1.0));
        assert_eq!(channel.sample(1.0), PropertyValue::Float(2.0));
        assert_eq!(channel.sample(1.5), PropertyValue::Float(2.0));
    }

    #[test]
    fn cubic_with_zero_tangents_is_smoothstep() {
        let zero = PropertyValue::Vec2f(Vec2::ZERO);
        let channel = AnimationChannel::new(
            "offset",
            vec![0.0, 2.0],
            vec![zero.clone(), PropertyValue::Vec2f(Vec2::new(4.0, 8.0))],
            Interpolation::Cubic,
        )
        .with_tangents(vec![zero.clone(), zero.clone()], vec![zero.clone(), zero]);
        channel.validate().unwrap();
        assert_eq!(channel.sample(1.0), PropertyValue::Vec2f(Vec2::new(2.0, 4.0)));
    }

    #[test]
    fn cubic_tangents_scale_with_segment_length() {
        let channel = AnimationChannel::new(
            "x",
            vec![0.0, 2.0],
            vec![PropertyValue::Float(0.0), PropertyValue::Float(0.0)],
            Interpolation::Cubic,
        )
        .with_tangents(
            vec![PropertyValue::Float(0.0), PropertyValue::Float(0.0)],
            vec![PropertyValue::Float(1.0), PropertyValue::Float(0.0)],
        );
        // h10(0.5) = 0.125, scaled by the segment length of 2
        assert_eq!(channel.sample(1.0), PropertyValue::Float(0.25));
    }

    #[test]
    fn integer_channels_round_to_nearest() {
        let channel = AnimationChannel::new(
            "cells",
            vec![0.0, 1.0],
            vec![
                PropertyValue::Vec2i(IVec2::new(0, 0)),
                PropertyValue::Vec2i(IVec2::new(3, 10)),
            ],
            Interpolation::Linear,
        );
        assert_eq!(channel.sample(0.5), PropertyValue::Vec2i(IVec2::new(2, 5)));
    }

    #[test]
    fn quaternion_results_are_normalized() {
        let channel = AnimationChannel::new(
            "orientation",
            vec![0.0, 1.0],
            vec![
                PropertyValue::Vec4f(Vec4::new(1.0, 0.0, 0.0, 0.0)),
                PropertyValue::Vec4f(Vec4::new(0.0, 1.0, 0.0, 0.0)),
            ],
            Interpolation::LinearQuaternion,
        );
        let PropertyValue::Vec4f(q) = channel.sample(0.5) else {
            panic!("expected Vec4f");
        };
        assert!((q.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn validation_rejects_bad_channels() {
        let mut unordered = rotation();
        unordered.timestamps = vec![1.0, 1.0];
        assert_eq!(
            unordered.validate(),
            Err(AnimationError::TimestampOrder("rotationZ".into()))
        );

        let mut mismatched = rotation();
        mismatched.keyframes.pop();
        assert!(matches!(
            mismatched.validate(),
            Err(AnimationError::KeyframeCount { .. })
        ));

        let mut cubic = rotation();
        cubic.interpolation = Interpolation::Cubic;
        assert_eq!(
            cubic.validate(),
            Err(AnimationError::MissingTangents("rotationZ".into()))
        );

        let mut quaternion = rotation();
        quaternion.interpolation = Interpolation::LinearQuaternion;
        assert_eq!(
            quaternion.validate(),
            Err(AnimationError::QuaternionType("rotationZ".into()))
        );

        let strings = AnimationChannel::new(
            "label",
            vec![0.0],
            vec![PropertyValue::String("a".into())],
            Interpolation::Step,
        );
        assert!(matches!(
            strings.validate(),
            Err(AnimationError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn node_reports_duration_and_channel_outputs() {
        let mut short = rotation();
        short.name = "short".into();
        short.timestamps = vec![0.5, 1.0];
        let node = AnimationNode::new(vec![rotation(), short]).unwrap();
        assert_eq!(node.duration(), 1.5);

        let (mut inputs, mut outputs) = node.interface();
        inputs.set_at(&[0], 0.75f32).unwrap();
        assert!(node.evaluate(&inputs, &mut outputs).unwrap());
        assert_eq!(outputs.child("duration").unwrap().get::<f32>(), Some(1.5));
        assert_eq!(outputs.child("rotationZ").unwrap().get::<f32>(), Some(180.0));
        assert_eq!(outputs.child("short").unwrap().get::<f32>(), Some(180.0));
    }

    #[test]
    fn node_rejects_duplicate_and_reserved_names() {
        assert_eq!(
            AnimationNode::new(vec![rotation(), rotation()]).unwrap_err(),
            AnimationError::DuplicateChannel("rotationZ".into())
        );
        let mut reserved = rotation();
        reserved.name = "duration".into();
        assert_eq!(
            AnimationNode::new(vec![reserved]).unwrap_err(),
            AnimationError::ReservedName("duration".into())
        );
        assert_eq!(AnimationNode::new(Vec::new()).unwrap_err(), AnimationError::NoChannels);
    }
}
