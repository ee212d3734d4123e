use std::time::{Duration, Instant};

use shaderscene::{
    ClockMode, DepthMode, FrameStatus, HeadlessDevice, IntervalScheduler, Lifecycle, NodeRole,
    PipelineError, ProgramStage, RenderDevice, SceneLifecycleController, SceneOptions,
    ShaderSourcePair, ShaderSubmission, ShapeKind,
};

const BACKGROUND_VERTEX: &str = r#"
varying vec2 vUv;
void main() {
    vUv = uv;
    gl_Position = vec4(position, 1.0);
}
"#;

const BACKGROUND_FRAGMENT: &str = r#"
precision mediump float;
uniform vec2 resolution;
varying vec2 vUv;
void main() {
    gl_FragColor = vec4(vUv, gl_FragCoord.x / resolution.x, 1.0);
}
"#;

const OBJECT_VERTEX: &str = r#"
varying vec3 vNormal;
void main() {
    vNormal = normalize(normalMatrix * normal);
    gl_Position = projectionMatrix * modelViewMatrix * vec4(position, 1.0);
}
"#;

const OBJECT_FRAGMENT: &str = r#"
uniform float time;
varying vec3 vNormal;
void main() {
    float pulse = 0.5 + 0.5 * sin(time);
    gl_FragColor = vec4(abs(vNormal) * pulse, 1.0);
}
"#;

const BROKEN_FRAGMENT: &str = r#"
varying vec3 vNormal;
void main() {
    gl_FragColor = vec4(vNormal * brightness, 1.0);
}
"#;

fn submission(shape: ShapeKind) -> ShaderSubmission {
    ShaderSubmission {
        background: ShaderSourcePair::new(BACKGROUND_VERTEX, BACKGROUND_FRAGMENT),
        object: ShaderSourcePair::new(OBJECT_VERTEX, OBJECT_FRAGMENT),
        shape,
    }
}

fn controller() -> SceneLifecycleController<HeadlessDevice> {
    SceneLifecycleController::new(HeadlessDevice::new(800, 600), SceneOptions::default())
}

#[test]
fn valid_submission_goes_live_with_one_program_pair() {
    let mut controller = controller();
    assert_eq!(controller.lifecycle(), Lifecycle::Uninitialized);

    controller.submit(&submission(ShapeKind::Sphere)).unwrap();

    assert_eq!(controller.lifecycle(), Lifecycle::Live);
    assert!(controller.render_loop().is_running());
    assert_eq!(controller.device().live_programs(), 2);
    assert_eq!(controller.device().live_meshes(), 2);
    let scene = controller.scene().unwrap();
    assert_eq!(scene.nodes.len(), 2);
    assert_eq!(scene.node(NodeRole::Object).unwrap().vertex_count, 1089);
}

#[test]
fn repeated_submissions_never_accumulate_programs() {
    let mut controller = controller();
    for (round, shape) in ShapeKind::ALL.iter().cycle().take(12).enumerate() {
        controller.submit(&submission(*shape)).unwrap();
        assert_eq!(controller.device().live_programs(), 2, "round {round}");
        assert_eq!(controller.device().live_meshes(), 2, "round {round}");
    }
    assert_eq!(controller.device().programs_created(), 24);
    assert_eq!(controller.device().programs_released(), 22);
}

#[test]
fn broken_fragment_leaves_nothing_allocated() {
    let mut controller = controller();
    let mut broken = submission(ShapeKind::Cube);
    broken.object.fragment_source = BROKEN_FRAGMENT.to_string();

    let err = controller.submit(&broken).unwrap_err();

    assert_eq!(err.stage(), Some(ProgramStage::Fragment));
    assert!(matches!(err, PipelineError::Compile(_)));
    assert_eq!(controller.lifecycle(), Lifecycle::Uninitialized);
    assert!(controller.scene().is_none());
    assert_eq!(controller.device().live_programs(), 0);
    assert_eq!(controller.device().live_meshes(), 0);
    // The background compiled fine and had to be released again.
    assert_eq!(controller.device().programs_created(), 1);
    assert_eq!(controller.device().programs_released(), 1);
}

#[test]
fn broken_background_vertex_is_reported_before_anything_else() {
    let mut controller = controller();
    let mut broken = submission(ShapeKind::Cube);
    broken.background.vertex_source = "void main() { gl_Position = vec4(nowhere, 1.0); }".into();
    broken.object.fragment_source = BROKEN_FRAGMENT.to_string();

    let err = controller.submit(&broken).unwrap_err();
    assert_eq!(err.stage(), Some(ProgramStage::Vertex));
    assert_eq!(controller.device().programs_created(), 0);
}

#[test]
fn link_failures_are_distinct_from_stage_failures() {
    let mut controller = controller();
    let mut mismatched = submission(ShapeKind::Cube);
    mismatched.object.fragment_source =
        "varying vec2 vNormal;\nvoid main() { gl_FragColor = vec4(vNormal, 0.0, 1.0); }\n".into();

    let err = controller.submit(&mismatched).unwrap_err();
    assert_eq!(err.stage(), Some(ProgramStage::Link));
    assert!(err.to_string().contains("vNormal"));
    assert_eq!(controller.device().live_programs(), 0);
}

#[test]
fn failed_resubmission_disposes_previous_scene() {
    let mut controller = controller();
    controller.submit(&submission(ShapeKind::Torus)).unwrap();

    let mut broken = submission(ShapeKind::Cube);
    broken.object.fragment_source = BROKEN_FRAGMENT.to_string();
    assert!(controller.submit(&broken).is_err());

    assert_eq!(controller.lifecycle(), Lifecycle::Uninitialized);
    assert_eq!(controller.device().live_programs(), 0);
    assert_eq!(controller.device().live_meshes(), 0);

    controller.submit(&submission(ShapeKind::Cube)).unwrap();
    assert_eq!(controller.lifecycle(), Lifecycle::Live);
}

#[test]
fn teardown_stops_all_drawing() {
    let mut controller = controller();
    controller.submit(&submission(ShapeKind::Cube)).unwrap();

    let now = Instant::now();
    for _ in 0..3 {
        assert_eq!(controller.frame(now).unwrap(), FrameStatus::Drawn);
    }
    assert_eq!(controller.device().frames_drawn(), 3);
    assert_eq!(controller.render_loop().frames_drawn(), 3);

    controller.teardown().unwrap();
    for _ in 0..5 {
        assert_eq!(controller.frame(now).unwrap(), FrameStatus::Idle);
    }
    assert_eq!(controller.device().frames_drawn(), 3);
    assert!(!controller.render_loop().is_running());
    assert_eq!(controller.lifecycle(), Lifecycle::Uninitialized);
    assert_eq!(controller.device().live_programs(), 0);
}

#[test]
fn teardown_without_scene_is_a_no_op() {
    let mut controller = controller();
    controller.teardown().unwrap();
    controller.teardown().unwrap();
    assert_eq!(controller.lifecycle(), Lifecycle::Uninitialized);
}

#[test]
fn unknown_shape_falls_back_to_cube() {
    let json = format!(
        r#"{{
            "background": {{"vertexSource": {bv:?}, "fragmentSource": {bf:?}}},
            "object": {{"vertexSource": {ov:?}, "fragmentSource": {of:?}}},
            "shape": "icosahedron"
        }}"#,
        bv = BACKGROUND_VERTEX,
        bf = BACKGROUND_FRAGMENT,
        ov = OBJECT_VERTEX,
        of = OBJECT_FRAGMENT,
    );
    let parsed: ShaderSubmission = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.shape, ShapeKind::Cube);

    let mut controller = controller();
    controller.submit(&parsed).unwrap();
    let object = controller.scene().unwrap().node(NodeRole::Object).unwrap();
    assert_eq!((object.vertex_count, object.index_count), (24, 36));
}

#[test]
fn background_is_drawn_first_without_depth() {
    for shape in ShapeKind::ALL {
        let mut controller = controller();
        controller.submit(&submission(shape)).unwrap();
        controller.frame(Instant::now()).unwrap();

        let frame = controller.device().last_frame();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame[0].mesh_label, "background");
        assert_eq!(frame[0].depth, DepthMode::DISABLED);
        assert_eq!(frame[1].mesh_label, shape.name());
        assert_eq!(frame[1].depth, DepthMode::OPAQUE);
    }
}

#[test]
fn each_frame_rotates_then_advances_time() {
    let options = SceneOptions {
        clock: ClockMode::FixedStep(Duration::from_millis(100)),
        ..SceneOptions::default()
    };
    let mut controller = SceneLifecycleController::new(HeadlessDevice::default(), options);
    controller.submit(&submission(ShapeKind::Cube)).unwrap();

    let now = Instant::now();
    for _ in 0..3 {
        controller.frame(now).unwrap();
    }

    let scene = controller.scene().unwrap();
    let object = scene.node(NodeRole::Object).unwrap();
    assert!((object.transform.rotation.x - 0.03).abs() < 1e-6);
    assert!((object.transform.rotation.y - 0.03).abs() < 1e-6);
    let time = object.material.uniforms().get_float("time").unwrap();
    assert!((time - 0.2).abs() < 1e-6);

    let background = scene.node(NodeRole::Background).unwrap();
    assert_eq!(background.transform.rotation.x, 0.0);
    assert_eq!(background.material.uniforms().get_float("time"), None);
}

#[test]
fn resubmission_restarts_the_clock() {
    let options = SceneOptions {
        clock: ClockMode::FixedStep(Duration::from_secs(1)),
        ..SceneOptions::default()
    };
    let mut controller = SceneLifecycleController::new(HeadlessDevice::default(), options);
    controller.submit(&submission(ShapeKind::Cube)).unwrap();
    let now = Instant::now();
    for _ in 0..4 {
        controller.frame(now).unwrap();
    }

    controller.submit(&submission(ShapeKind::Sphere)).unwrap();
    controller.frame(now).unwrap();
    let object = controller.scene().unwrap().node(NodeRole::Object).unwrap();
    assert_eq!(object.material.uniforms().get_float("time"), Some(0.0));
    assert_eq!(controller.render_loop().frames_drawn(), 1);
}

#[test]
fn interval_scheduler_skips_frames_until_due() {
    let scheduler = IntervalScheduler::from_fps(10.0).unwrap();
    let mut controller = SceneLifecycleController::with_scheduler(
        HeadlessDevice::default(),
        SceneOptions::default(),
        Box::new(scheduler),
    );
    controller.submit(&submission(ShapeKind::Cube)).unwrap();

    let start = Instant::now();
    assert_eq!(controller.frame(start).unwrap(), FrameStatus::Drawn);
    assert_eq!(
        controller.frame(start + Duration::from_millis(20)).unwrap(),
        FrameStatus::Skipped
    );
    assert_eq!(
        controller.frame(start + Duration::from_millis(150)).unwrap(),
        FrameStatus::Drawn
    );
    assert_eq!(controller.device().frames_drawn(), 2);
}

#[test]
fn exhausted_device_fails_submission_without_leaks() {
    let device = HeadlessDevice::default().with_program_budget(1);
    let mut controller = SceneLifecycleController::new(device, SceneOptions::default());

    let err = controller.submit(&submission(ShapeKind::Cube)).unwrap_err();
    assert!(matches!(err, PipelineError::ResourceExhausted(_)));
    assert_eq!(controller.lifecycle(), Lifecycle::Uninitialized);
    assert_eq!(controller.device().live_programs(), 0);
    assert_eq!(controller.device().live_meshes(), 0);
}

#[test]
fn failed_teardown_requires_reset() {
    let mut controller = controller();
    controller.submit(&submission(ShapeKind::Cube)).unwrap();

    controller.device_mut().set_fail_releases(true);
    let err = controller.teardown().unwrap_err();
    assert!(matches!(err, PipelineError::Teardown(ref failures) if failures.len() == 4));
    assert!(controller.is_faulted());
    assert_eq!(controller.lifecycle(), Lifecycle::Uninitialized);
    assert_eq!(controller.frame(Instant::now()).unwrap(), FrameStatus::Idle);

    controller.device_mut().set_fail_releases(false);
    assert_eq!(
        controller.submit(&submission(ShapeKind::Cube)).unwrap_err(),
        PipelineError::ResetRequired
    );

    controller.reset();
    assert!(!controller.is_faulted());
    assert_eq!(controller.device().live_programs(), 0);
    assert_eq!(controller.device().live_meshes(), 0);
    controller.submit(&submission(ShapeKind::Cube)).unwrap();
    assert_eq!(controller.lifecycle(), Lifecycle::Live);
}

#[test]
fn resize_updates_camera_aspect() {
    let mut controller = controller();
    controller.submit(&submission(ShapeKind::Cube)).unwrap();
    controller.resize(1000, 500);
    assert_eq!(controller.device().surface_size(), (1000, 500));
    assert_eq!(controller.scene().unwrap().camera.aspect, 2.0);

    controller.resize(0, 0);
    assert_eq!(controller.device().surface_size(), (1000, 500));
}
