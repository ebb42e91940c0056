use std::rc::Rc;

use arbor_core::{
    create_root_with_options, deps, host, text, Child, Component, Context, EffectCleanup, Handler, InstanceId,
    MemoryHost, Props, RenderError, Root, RootOptions,
};
use arbor_runtime_std::StdScheduler;

const MAX_TURNS: usize = 1_000;

fn theme_context() -> Context<&'static str> {
    thread_local! {
        static THEME: Context<&'static str> = Context::new("light");
    }
    THEME.with(Clone::clone)
}

fn counter() -> Component {
    Component::new("Counter", |cx, _| {
        let (count, set_count) = cx.use_state(|| 0i64)?;
        let theme = cx.use_context(&theme_context());
        cx.use_effect(
            move || {
                log::info!("counter committed with {count}");
                Some(Box::new(move || log::info!("counter leaving {count}")) as EffectCleanup)
            },
            Some(deps![count]),
        )?;
        let increment = Handler::new(move || set_count.update(|count| count + 1));
        Ok(Child::Element(host(
            "button",
            Props::new()
                .with_attr("class", *theme)
                .with_attr("onclick", increment)
                .with_children(text(format!("clicked {count} times"))),
        )))
    })
}

fn todo_list() -> Component {
    Component::new("TodoList", |cx, _| {
        let (items, set_items) = cx.use_state(|| vec!["write", "review", "ship"])?;
        let (pending, start_transition) = cx.use_transition()?;
        let reverse = Handler::new(move || {
            let set_items = set_items.clone();
            start_transition.start(move || {
                set_items.update(|items| items.iter().rev().copied().collect());
            });
        });
        let rows: Vec<Child> = items
            .iter()
            .map(|item| Child::Element(host("li", Props::new().with_children(text(*item))).with_key(*item)))
            .collect();
        Ok(Child::Element(host(
            "section",
            Props::new()
                .with_attr("busy", pending)
                .with_children(vec![
                    Child::Element(host("ol", Props::new().with_children(rows))),
                    Child::Element(host(
                        "a",
                        Props::new().with_attr("onclick", reverse).with_children(text("reverse")),
                    )),
                ]),
        )))
    })
}

fn app() -> Child {
    let content = vec![
        Child::Element(counter().element(Props::new())),
        Child::Element(todo_list().element(Props::new())),
    ];
    Child::Element(theme_context().provider("dark", content))
}

/// Drain microtasks and scheduler tasks until the root has nothing left to do.
fn run_until_settled(root: &Root<MemoryHost>, scheduler: &StdScheduler) -> Result<(), RenderError> {
    let microtasks = root.with_host(MemoryHost::microtasks)?;
    for _ in 0..MAX_TURNS {
        let ran = microtasks.run_all() + scheduler.run_until_idle();
        if let Some(error) = root.take_error() {
            return Err(error);
        }
        if ran == 0 {
            return Ok(());
        }
    }
    log::warn!("demo: work still pending after {MAX_TURNS} turns");
    Ok(())
}

fn click(root: &Root<MemoryHost>, container: InstanceId, ty: &str) -> Result<(), RenderError> {
    let handler = root.with_host(|host| host.find_element(container, ty).and_then(|id| host.handler(id, "onclick")))?;
    match handler {
        Some(handler) => handler.call(),
        None => log::warn!("demo: no clickable <{ty}>"),
    }
    Ok(())
}

fn print_markup(root: &Root<MemoryHost>, container: InstanceId, title: &str) -> Result<(), RenderError> {
    let markup = root.with_host(|host| host.render_to_string(container))?;
    println!("{title}:\n  {markup}");
    Ok(())
}

fn main() -> Result<(), RenderError> {
    env_logger::init();

    println!("=== Arbor reconciler demo ===");
    println!("Renders into an in-memory host, then clicks through a few updates.");
    println!();

    let scheduler = Rc::new(StdScheduler::new());
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let root = create_root_with_options(host, container, scheduler.clone(), RootOptions::new().label("demo"));

    root.render(app());
    run_until_settled(&root, &scheduler)?;
    print_markup(&root, container, "mounted")?;

    click(&root, container, "button")?;
    click(&root, container, "button")?;
    run_until_settled(&root, &scheduler)?;
    print_markup(&root, container, "after two clicks")?;

    click(&root, container, "a")?;
    run_until_settled(&root, &scheduler)?;
    print_markup(&root, container, "after reversing in a transition")?;

    root.unmount();
    run_until_settled(&root, &scheduler)?;
    print_markup(&root, container, "unmounted")?;
    Ok(())
}
