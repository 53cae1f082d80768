//! Sandbox tests against real V8 isolates.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod sandbox_tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use serde_json::{Value, json};

    use crate::bridge::{CapabilityError, CapabilityName, CapabilitySet};
    use crate::executor::Sandbox;
    use crate::limits::ResourceLimits;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn sandbox() -> Sandbox {
        Sandbox::default()
    }

    async fn run(snippet: &str) -> crate::RunResult {
        sandbox().run(snippet, &CapabilitySet::new(), TIMEOUT).await
    }

    fn search_capability() -> CapabilitySet {
        CapabilitySet::new()
            .with(CapabilityName::WebSearch, |args: Value| async move {
                Ok::<_, CapabilityError>(json!([{ "title": format!("result for {args}") }]))
            })
            .unwrap()
    }

    // ==================== Terminal answer ====================

    #[tokio::test]
    async fn test_final_answer() {
        let result = run(r#"finalAnswer("42");"#).await;

        assert_eq!(result.terminal_answer.as_deref(), Some("42"));
        assert!(result.error.is_none(), "error: {:?}", result.error);
    }

    #[tokio::test]
    async fn test_first_final_answer_wins() {
        let result = run(
            r#"
            finalAnswer("first");
            finalAnswer("second");
            "#,
        )
        .await;

        assert_eq!(result.terminal_answer.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_final_answer_renders_non_strings() {
        let result = run(r#"finalAnswer({ total: 3 });"#).await;
        assert_eq!(result.terminal_answer.as_deref(), Some(r#"{"total":3}"#));
    }

    #[tokio::test]
    async fn test_answer_survives_later_exception() {
        let result = run(
            r#"
            finalAnswer("done");
            throw new Error("after the fact");
            "#,
        )
        .await;

        assert_eq!(result.terminal_answer.as_deref(), Some("done"));
        assert!(result.error.is_none());
    }

    // ==================== Errors ====================

    #[tokio::test]
    async fn test_thrown_error_message_is_verbatim() {
        let result = run(r#"throw new Error("boom");"#).await;

        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.terminal_answer.is_none());
    }

    #[tokio::test]
    async fn test_error_after_capability_call() {
        let result = sandbox()
            .run(
                r#"await webSearch("x"); throw new Error("boom");"#,
                &search_capability(),
                TIMEOUT,
            )
            .await;

        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.terminal_answer.is_none());
        assert_eq!(result.stats.capability_calls, 1);
    }

    #[tokio::test]
    async fn test_syntax_error_reported() {
        let result = run("const = ;").await;

        assert!(result.error.is_some());
        assert!(result.terminal_answer.is_none());
    }

    #[tokio::test]
    async fn test_script_too_large_rejected() {
        let sandbox = Sandbox::new(ResourceLimits {
            max_script_bytes: 16,
            ..Default::default()
        });
        let result = sandbox
            .run(
                r#"finalAnswer("this is far too long");"#,
                &CapabilitySet::new(),
                TIMEOUT,
            )
            .await;

        assert!(result.error.unwrap().contains("script too large"));
        assert!(result.terminal_answer.is_none());
    }

    // ==================== Return values ====================

    #[tokio::test]
    async fn test_raw_return_value() {
        let result = run("return { items: [1, 2] };").await;

        assert_eq!(result.raw_return_value, Some(json!({ "items": [1, 2] })));
        assert!(result.terminal_answer.is_none());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_lazy_return_of_trailing_identifier() {
        let result = run("const total = 40 + 2;\ntotal").await;
        assert_eq!(result.raw_return_value, Some(json!(42)));
    }

    #[tokio::test]
    async fn test_unserializable_return_dropped() {
        let result = run("const a = {}; a.self = a; return a;").await;

        assert!(result.raw_return_value.is_none());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_no_answer_no_value() {
        let result = run("const x = 1;").await;

        assert!(result.terminal_answer.is_none());
        assert!(result.raw_return_value.is_none());
        assert!(result.error.is_none());
    }

    // ==================== Isolation ====================

    #[tokio::test]
    async fn test_host_globals_unreachable() {
        let result = run(
            r#"
            finalAnswer([
                typeof Deno,
                typeof eval,
                typeof require,
                typeof fetch,
                typeof process,
                typeof Function,
            ].join(","));
            "#,
        )
        .await;

        assert_eq!(
            result.terminal_answer.as_deref(),
            Some("undefined,undefined,undefined,undefined,undefined,undefined")
        );
    }

    #[tokio::test]
    async fn test_function_constructor_locked() {
        let result = run(
            r#"
            const ctor = (() => {}).constructor;
            finalAnswer(String(ctor));
            "#,
        )
        .await;

        assert_eq!(result.terminal_answer.as_deref(), Some("undefined"));
    }

    #[tokio::test]
    async fn test_runs_share_no_state() {
        let sandbox = sandbox();
        let caps = CapabilitySet::new();

        let first = sandbox
            .run("globalThis.leaked = 1; finalAnswer('set');", &caps, TIMEOUT)
            .await;
        let second = sandbox
            .run("finalAnswer(typeof leaked);", &caps, TIMEOUT)
            .await;

        assert_eq!(first.terminal_answer.as_deref(), Some("set"));
        assert_eq!(second.terminal_answer.as_deref(), Some("undefined"));
    }

    #[tokio::test]
    async fn test_only_supplied_capabilities_installed() {
        let result = sandbox()
            .run(
                "finalAnswer([typeof webSearch, typeof notify].join(','));",
                &search_capability(),
                TIMEOUT,
            )
            .await;

        assert_eq!(result.terminal_answer.as_deref(), Some("function,undefined"));
    }

    // ==================== Resource limits ====================

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let result = sandbox()
            .run("while (true) {}", &CapabilitySet::new(), timeout)
            .await;
        let elapsed = started.elapsed();

        assert_eq!(
            result.error.as_deref(),
            Some("execution timed out after 300ms")
        );
        assert!(
            elapsed < Duration::from_secs(3),
            "took too long: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_timeout_discards_answer() {
        let result = sandbox()
            .run(
                "finalAnswer('early'); while (true) {}",
                &CapabilitySet::new(),
                Duration::from_millis(200),
            )
            .await;

        assert!(result.terminal_answer.is_none());
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_heap_limit_enforced() {
        let sandbox = Sandbox::new(ResourceLimits {
            max_memory_bytes: 10 * 1024 * 1024,
            ..Default::default()
        });
        let result = sandbox
            .run(
                r#"
                const chunks = [];
                while (true) {
                    chunks.push(new Array(100000).fill("x"));
                }
                "#,
                &CapabilitySet::new(),
                Duration::from_secs(30),
            )
            .await;

        let error = result.error.unwrap();
        assert!(error.contains("memory limit exceeded"), "got: {error}");
        assert!(result.terminal_answer.is_none());

        let next = sandbox
            .run("finalAnswer('alive')", &CapabilitySet::new(), TIMEOUT)
            .await;
        assert_eq!(next.terminal_answer.as_deref(), Some("alive"));
        assert!(next.error.is_none());
    }

    #[tokio::test]
    async fn test_array_buffers_count_against_memory_limit() {
        let sandbox = Sandbox::new(ResourceLimits {
            max_memory_bytes: 16 * 1024 * 1024,
            ..Default::default()
        });
        let result = sandbox
            .run(
                r#"
                const buffers = [];
                for (let i = 0; i < 8; i++) {
                    const bytes = new Uint8Array(64 << 20);
                    bytes.fill(1);
                    buffers.push(bytes);
                }
                finalAnswer("ok");
                "#,
                &CapabilitySet::new(),
                TIMEOUT,
            )
            .await;

        let error = result.error.unwrap();
        assert!(error.contains("memory limit exceeded"), "got: {error}");
        assert!(result.terminal_answer.is_none());

        let next = sandbox
            .run("finalAnswer('alive')", &CapabilitySet::new(), TIMEOUT)
            .await;
        assert_eq!(next.terminal_answer.as_deref(), Some("alive"));
    }

    #[tokio::test]
    async fn test_small_array_buffers_within_limit() {
        let sandbox = Sandbox::new(ResourceLimits {
            max_memory_bytes: 16 * 1024 * 1024,
            ..Default::default()
        });
        let result = sandbox
            .run(
                r#"
                for (let i = 0; i < 64; i++) {
                    new Uint8Array(1 << 20).fill(1);
                }
                const bytes = new Uint8Array(1024).fill(7);
                finalAnswer(String(bytes.reduce((a, b) => a + b, 0)));
                "#,
                &CapabilitySet::new(),
                TIMEOUT,
            )
            .await;

        assert!(result.error.is_none(), "{:?}", result.error);
        assert_eq!(result.terminal_answer.as_deref(), Some("7168"));
    }

    #[tokio::test]
    async fn test_hanging_capability_times_out() {
        let caps = CapabilitySet::new()
            .with(CapabilityName::FetchText, |_args: Value| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, CapabilityError>(Value::Null)
            })
            .unwrap();

        let started = Instant::now();
        let result = sandbox()
            .run(
                "const page = await fetchText('https://example.com'); finalAnswer(page);",
                &caps,
                Duration::from_millis(300),
            )
            .await;

        assert!(result.error.unwrap().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    // ==================== Capabilities ====================

    #[tokio::test]
    async fn test_capability_round_trip() {
        let result = sandbox()
            .run(
                r#"
                const hits = await webSearch("rust");
                finalAnswer(hits[0].title);
                "#,
                &search_capability(),
                TIMEOUT,
            )
            .await;

        assert_eq!(
            result.terminal_answer.as_deref(),
            Some(r#"result for "rust""#)
        );
        assert_eq!(result.stats.capability_calls, 1);
    }

    #[tokio::test]
    async fn test_capability_error_can_be_caught() {
        let caps = CapabilitySet::new()
            .with(CapabilityName::Notify, |_args: Value| async move {
                Err::<Value, _>(CapabilityError::new("channel closed"))
            })
            .unwrap();

        let result = sandbox()
            .run(
                r#"
                try {
                    await notify("hi");
                } catch (e) {
                    finalAnswer("caught: " + e.message);
                }
                "#,
                &caps,
                TIMEOUT,
            )
            .await;

        assert_eq!(
            result.terminal_answer.as_deref(),
            Some("caught: channel closed")
        );
    }

    #[tokio::test]
    async fn test_uncaught_capability_error_fails_run() {
        let caps = CapabilitySet::new()
            .with(CapabilityName::Notify, |_args: Value| async move {
                Err::<Value, _>(CapabilityError::new("channel closed"))
            })
            .unwrap();

        let result = sandbox().run("await notify('hi');", &caps, TIMEOUT).await;
        assert_eq!(result.error.as_deref(), Some("channel closed"));
    }

    #[tokio::test]
    async fn test_capability_arguments_copied_in() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let caps = CapabilitySet::new()
            .with(CapabilityName::WriteNote, move |args: Value| {
                let recorder = Arc::clone(&recorder);
                async move {
                    recorder.lock().unwrap().push(args);
                    Ok::<_, CapabilityError>(json!({ "saved": true }))
                }
            })
            .unwrap();

        let result = sandbox()
            .run(
                r#"
                await writeNote();
                await writeNote({ text: "a" });
                const r = await writeNote("t", 2);
                finalAnswer(String(r.saved));
                "#,
                &caps,
                TIMEOUT,
            )
            .await;

        assert_eq!(result.terminal_answer.as_deref(), Some("true"));
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![Value::Null, json!({ "text": "a" }), json!(["t", 2])]
        );
    }

    #[tokio::test]
    async fn test_capability_call_limit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let caps = CapabilitySet::new()
            .with(CapabilityName::WebSearch, move |_args: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, CapabilityError>(Value::Null) }
            })
            .unwrap();
        let sandbox = Sandbox::new(ResourceLimits {
            max_capability_calls: 2,
            ..Default::default()
        });

        let result = sandbox
            .run(
                r#"
                await webSearch("a");
                await webSearch("b");
                await webSearch("c");
                "#,
                &caps,
                TIMEOUT,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            result.error.as_deref(),
            Some("capability call limit exceeded (max 2)")
        );
    }

    // ==================== Output capture ====================

    #[tokio::test]
    async fn test_console_capture() {
        let result = run(
            r#"
            console.log("hello", 1, { a: true });
            console.error("bad thing");
            console.warn("careful");
            finalAnswer("ok");
            "#,
        )
        .await;

        assert_eq!(result.stdout, vec![r#"hello 1 {"a":true}"#]);
        assert_eq!(result.stderr, vec!["bad thing", "careful"]);
        assert!(!result.output_truncated);
    }

    #[tokio::test]
    async fn test_output_truncated_at_budget() {
        let sandbox = Sandbox::new(ResourceLimits {
            max_output_chars: 10,
            ..Default::default()
        });
        let result = sandbox
            .run(
                r#"
                for (let i = 0; i < 100; i++) console.log("0123456789");
                finalAnswer("ok");
                "#,
                &CapabilitySet::new(),
                TIMEOUT,
            )
            .await;

        let captured: usize = result.stdout.iter().map(|l| l.chars().count()).sum();
        assert_eq!(captured, 10);
        assert!(result.output_truncated);
        assert_eq!(result.terminal_answer.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_output_kept_on_error() {
        let result = run(
            r#"
            console.log("step 1");
            throw new Error("step 2 failed");
            "#,
        )
        .await;

        assert_eq!(result.stdout, vec!["step 1"]);
        assert_eq!(result.error.as_deref(), Some("step 2 failed"));
    }

    #[tokio::test]
    async fn test_wall_time_recorded() {
        let result = run("finalAnswer('x');").await;
        assert!(result.stats.wall_time_ms < TIMEOUT.as_millis() as u64);
    }
}
