//! Playback plugin boundary
//!
//! Video playback and output plugins are external collaborators. They are
//! driven through [`PlaybackPlugin`], and [`plugin_instance`] wraps one into
//! an [`ObjectInstance`] of type `obj.PLUG`:
//!
//! - attributes `version`, `description`, `palettes`, `palette` and
//!   `capabilities` mirror what the plugin reports
//! - contract `init` (CREATE_BUNDLE) calls `init_screen`
//! - contract `play frame` (PLAY) calls `render_frame`
//! - contract `teardown` (DESTROY_INSTANCE) calls `exit_screen`

use crate::attribute::{AttrDef, AttrGroup};
use crate::contract::Contract;
use crate::error::{TxError, TxOutcome};
use crate::object::{ObjectInstance, ObjectTemplate};
use crate::trajectory::{Functional, Segment, Trajectory};
use nirva_core::{
    caps, BundleLike, Error, Intent, ObjectState, ObjectType, Result, StrandType, StrandValue,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Functions every playback plugin exports
pub trait PlaybackPlugin: Send + Sync {
    /// `None` if the plugin can run here, otherwise the reason it cannot
    fn module_check_init(&self) -> Option<String>;

    /// Version string
    fn version(&self) -> String;

    /// Human readable description
    fn description(&self) -> String;

    /// Palettes the plugin accepts, in order of preference
    fn palette_list(&self) -> Vec<i32>;

    /// Choose the palette frames will arrive in
    fn set_palette(&self, palette: i32) -> bool;

    /// Capability bits for `palette`
    fn capabilities(&self, palette: i32) -> u64;

    /// Open the output
    fn init_screen(&self, width: i32, height: i32, fullscreen: bool, window_id: u64, args: &[String]) -> bool;

    /// Show one frame; `pixel_data` is an opaque handle to the pixels
    fn render_frame(&self, hsize: i32, vsize: i32, timecode: i64, pixel_data: Option<u64>) -> bool;

    /// Close the output, restoring the pointer to the given position
    fn exit_screen(&self, mouse_x: i32, mouse_y: i32);

    /// Release everything before the plugin is dropped
    fn module_unload(&self);

    /// YUV sampling types supported for `palette`
    fn yuv_palette_sampling(&self, _palette: i32) -> Vec<i32> {
        Vec::new()
    }

    /// YUV clamping types supported for `palette`
    fn yuv_palette_clamping(&self, _palette: i32) -> Vec<i32> {
        Vec::new()
    }

    /// YUV subspaces supported for `palette`
    fn yuv_palette_subspace(&self, _palette: i32) -> Vec<i32> {
        Vec::new()
    }

    /// Tell the plugin the playback rate; false if unsupported
    fn set_fps(&self, _fps: f64) -> bool {
        false
    }

    /// Deliver pending key events to `sink` as (pressed, keycode, modifiers)
    fn send_keycodes(&self, _sink: &mut dyn FnMut(bool, u16, u16) -> bool) -> bool {
        false
    }
}

fn failed(call: &str) -> TxError {
    TxError::functional(call, "plugin reported failure")
}

fn opt_int(attrs: &AttrGroup, name: &str, default: i32) -> TxOutcome<i32> {
    match attrs.get(name) {
        Some(a) if a.has_value() => Ok(attrs.get_int(name)?),
        _ => Ok(default),
    }
}

fn init_contract(plugin: &Arc<dyn PlaybackPlugin>) -> TxOutcome<Arc<Contract>> {
    let p = Arc::clone(plugin);
    Contract::builder("init", Intent::CREATE_BUNDLE)
        .cap(caps::LOCAL)
        .cap(caps::DISPLAY)
        .input(AttrDef::new("width", StrandType::Int))
        .input(AttrDef::new("height", StrandType::Int))
        .input(AttrDef::with_default("fullscreen", false).optional())
        .input(AttrDef::with_default("window_id", 0u64).optional())
        .input(AttrDef::new("args", StrandType::String).array().optional())
        .trajectory(Trajectory::new("init").segment(Segment::new("open").functional(
            Functional::standard("init_screen", move |attrs| {
                let fullscreen = match attrs.get("fullscreen") {
                    Some(a) if a.has_value() => attrs.get_bool("fullscreen")?,
                    _ => false,
                };
                let window_id = match attrs.get_value("window_id") {
                    Ok(StrandValue::Uint64(id)) => id,
                    _ => 0,
                };
                let args: Vec<String> = attrs
                    .get_array("args")
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|v| match v {
                        StrandValue::String(s) => s,
                        _ => None,
                    })
                    .collect();
                let (w, h) = (attrs.get_int("width")?, attrs.get_int("height")?);
                if p.init_screen(w, h, fullscreen, window_id, &args) {
                    Ok(())
                } else {
                    Err(failed("init_screen"))
                }
            }),
        )))
        .build()
}

fn play_contract(plugin: &Arc<dyn PlaybackPlugin>) -> TxOutcome<Arc<Contract>> {
    let p = Arc::clone(plugin);
    Contract::builder("play frame", Intent::PLAY)
        .cap(caps::LOCAL)
        .cap(caps::DISPLAY)
        .cap(caps::VIDEO)
        .cap(caps::REALTIME)
        .input(AttrDef::new("hsize", StrandType::Int))
        .input(AttrDef::new("vsize", StrandType::Int))
        .input(AttrDef::with_default("timecode", 0i64).optional())
        .input(AttrDef::new("pixel_data", StrandType::VoidPtr).optional())
        .trajectory(Trajectory::new("play").segment(Segment::new("render").functional(
            Functional::standard("render_frame", move |attrs| {
                let pixels = match attrs.get_value("pixel_data") {
                    Ok(StrandValue::VoidPtr(ptr)) => ptr,
                    _ => None,
                };
                let ok = p.render_frame(
                    attrs.get_int("hsize")?,
                    attrs.get_int("vsize")?,
                    attrs.get_int64("timecode")?,
                    pixels,
                );
                if ok {
                    Ok(())
                } else {
                    Err(failed("render_frame"))
                }
            }),
        )))
        .build()
}

fn teardown_contract(plugin: &Arc<dyn PlaybackPlugin>) -> TxOutcome<Arc<Contract>> {
    let p = Arc::clone(plugin);
    Contract::builder("teardown", Intent::DESTROY_INSTANCE)
        .input(AttrDef::with_default("mouse_x", 0).optional())
        .input(AttrDef::with_default("mouse_y", 0).optional())
        .trajectory(Trajectory::new("teardown").segment(Segment::new("close").functional(
            Functional::standard("exit_screen", move |attrs| {
                p.exit_screen(opt_int(attrs, "mouse_x", 0)?, opt_int(attrs, "mouse_y", 0)?);
                Ok(())
            }),
        )))
        .build()
}

/// Wrap `plugin` into an object instance
///
/// The preferred palette (first in the list) is selected and the instance
/// starts in NOT_READY; `init` is available there, `play frame` and
/// `teardown` once the caller has moved it to PREPARED or beyond.
///
/// # Errors
///
/// `InvalidInput` if the plugin's own check fails, it lists no palettes or it
/// refuses its preferred palette.
pub fn plugin_instance(name: &str, plugin: Arc<dyn PlaybackPlugin>) -> TxOutcome<Arc<ObjectInstance>> {
    if let Some(reason) = plugin.module_check_init() {
        return Err(Error::invalid_input(format!("plugin '{}' cannot start: {}", name, reason)).into());
    }
    let palettes = plugin.palette_list();
    let Some(&palette) = palettes.first() else {
        return Err(Error::invalid_input(format!("plugin '{}' lists no palettes", name)).into());
    };
    if !plugin.set_palette(palette) {
        return Err(Error::invalid_input(format!(
            "plugin '{}' refused palette {}",
            name, palette
        ))
        .into());
    }

    let running = [ObjectState::Prepared, ObjectState::ActiveIdle, ObjectState::Busy];
    let template = ObjectTemplate::new(ObjectType::PLUGIN, name)
        .attr(AttrDef::with_default("version", plugin.version()).readonly())
        .attr(AttrDef::with_default("description", plugin.description()).readonly())
        .attr(
            AttrDef::new("palettes", StrandType::Int)
                .array()
                .readonly()
                .default_values(palettes.iter().copied().map(StrandValue::from).collect()),
        )
        .attr(AttrDef::with_default("palette", palette))
        .attr(AttrDef::with_default("capabilities", plugin.capabilities(palette)))
        .contract_in(init_contract(&plugin)?, &[ObjectState::NotReady, ObjectState::Normal])
        .contract_in(play_contract(&plugin)?, &running)
        .contract_in(teardown_contract(&plugin)?, &running);

    let obj = ObjectInstance::new(Arc::new(template), 0)?;
    obj.set_state(ObjectState::NotReady)?;
    info!(target: "nirva::object", plugin = %name, version = %plugin.version(), palette, "plugin wrapped");
    Ok(obj)
}

/// Switch the plugin to another palette and refresh the mirrored attributes
pub fn select_palette(obj: &ObjectInstance, plugin: &dyn PlaybackPlugin, palette: i32) -> Result<()> {
    let listed = obj
        .attrs()
        .get_array("palettes")?
        .iter()
        .any(|v| v.as_int() == Some(palette));
    if !listed || !plugin.set_palette(palette) {
        return Err(Error::invalid_input(format!("palette {} not supported", palette)));
    }
    obj.attrs().set_value("palette", palette.into())?;
    obj.attrs()
        .set_value("capabilities", plugin.capabilities(palette).into())?;
    debug!(target: "nirva::object", uid = %obj.uid(), palette, "palette selected");
    Ok(())
}
