//! Immutable tree descriptions produced by components.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::collections::map::IndexMap;
use crate::context::ContextId;
use crate::error::RenderError;
use crate::hooks::RenderCx;
use crate::platform::InstanceId;

pub type Key = Rc<str>;

/// Event handler stored as an attribute. Compared by identity.
#[derive(Clone)]
pub struct Handler(Rc<dyn Fn()>);

impl Handler {
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self) {
        (self.0)()
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(Rc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Handler(Handler),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => write!(f, "{s:?}"),
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Handler(_) => f.write_str("<handler>"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.into())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value.into())
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(value.into())
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<Handler> for AttrValue {
    fn from(value: Handler) -> Self {
        AttrValue::Handler(value)
    }
}

/// Properties of an element: ordered attributes, children and optional
/// opaque data (component input or a provider's value).
#[derive(Clone, Default)]
pub struct Props {
    attrs: IndexMap<Rc<str>, AttrValue>,
    children: Child,
    data: Option<Rc<dyn Any>>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_children(mut self, children: impl Into<Child>) -> Self {
        self.children = children.into();
        self
    }

    pub fn with_data<T: 'static>(mut self, data: T) -> Self {
        self.data = Some(Rc::new(data));
        self
    }

    pub(crate) fn with_raw_data(mut self, data: Rc<dyn Any>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&Rc<str>, &AttrValue)> {
        self.attrs.iter()
    }

    pub fn children(&self) -> &Child {
        &self.children
    }

    /// Typed view of the opaque data slot.
    pub fn data<T: 'static>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|data| data.downcast_ref::<T>())
    }

    pub(crate) fn raw_data(&self) -> Option<&Rc<dyn Any>> {
        self.data.as_ref()
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Props")
            .field("attrs", &self.attrs)
            .field("children", &self.children)
            .field("has_data", &self.data.is_some())
            .finish()
    }
}

type RenderFn = dyn Fn(&mut RenderCx<'_>, &Props) -> Result<Child, RenderError>;

/// A function component. Two components are the same type only when they
/// share the same render function allocation, so keep one `Component` value
/// around and clone it rather than rebuilding it per render.
#[derive(Clone)]
pub struct Component {
    name: Rc<str>,
    render: Rc<RenderFn>,
}

impl Component {
    pub fn new(
        name: &str,
        render: impl Fn(&mut RenderCx<'_>, &Props) -> Result<Child, RenderError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            render: Rc::new(render),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        self.name.clone()
    }

    pub fn element(&self, props: Props) -> Element {
        Element::new(ElementType::Component(self.clone()), props)
    }

    pub(crate) fn render(&self, cx: &mut RenderCx<'_>, props: &Props) -> Result<Child, RenderError> {
        (self.render)(cx, props)
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ElementType {
    Host(Rc<str>),
    Component(Component),
    Fragment,
    Provider(ContextId),
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Host(tag) => f.write_str(tag),
            ElementType::Component(component) => f.write_str(component.name()),
            ElementType::Fragment => f.write_str("Fragment"),
            ElementType::Provider(id) => write!(f, "Provider({})", id.0),
        }
    }
}

/// Handle that receives the host instance of a host element once it is
/// placed, and `None` when the element goes away.
#[derive(Clone)]
pub enum HostRef {
    Callback(Rc<dyn Fn(Option<InstanceId>)>),
    Slot(Rc<Cell<Option<InstanceId>>>),
}

impl HostRef {
    pub fn callback(f: impl Fn(Option<InstanceId>) + 'static) -> Self {
        HostRef::Callback(Rc::new(f))
    }

    /// A cell-backed ref plus the cell to read it from.
    pub fn slot() -> (Self, Rc<Cell<Option<InstanceId>>>) {
        let cell = Rc::new(Cell::new(None));
        (HostRef::Slot(cell.clone()), cell)
    }

    pub(crate) fn set(&self, instance: Option<InstanceId>) {
        match self {
            HostRef::Callback(f) => f(instance),
            HostRef::Slot(cell) => cell.set(instance),
        }
    }

    pub(crate) fn same(&self, other: &HostRef) -> bool {
        match (self, other) {
            (HostRef::Callback(a), HostRef::Callback(b)) => Rc::ptr_eq(a, b),
            (HostRef::Slot(a), HostRef::Slot(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostRef::Callback(_) => f.write_str("HostRef::Callback"),
            HostRef::Slot(cell) => write!(f, "HostRef::Slot({:?})", cell.get()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Element {
    ty: ElementType,
    key: Option<Key>,
    props: Rc<Props>,
    host_ref: Option<HostRef>,
}

impl Element {
    pub fn new(ty: ElementType, props: Props) -> Self {
        Self {
            ty,
            key: None,
            props: Rc::new(props),
            host_ref: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_ref(mut self, host_ref: HostRef) -> Self {
        self.host_ref = Some(host_ref);
        self
    }

    pub fn ty(&self) -> &ElementType {
        &self.ty
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn props(&self) -> &Rc<Props> {
        &self.props
    }

    pub(crate) fn host_ref(&self) -> Option<&HostRef> {
        self.host_ref.as_ref()
    }
}

/// What a component (or a props `children` slot) renders to.
#[derive(Clone, Debug, Default)]
pub enum Child {
    Element(Element),
    Text(Rc<str>),
    List(Vec<Child>),
    #[default]
    Empty,
}

impl Child {
    /// Identity comparison: same element props allocation, same text
    /// allocation, or both empty.
    pub(crate) fn same(&self, other: &Child) -> bool {
        match (self, other) {
            (Child::Element(a), Child::Element(b)) => Rc::ptr_eq(&a.props, &b.props) && a.ty == b.ty,
            (Child::Text(a), Child::Text(b)) => Rc::ptr_eq(a, b),
            (Child::Empty, Child::Empty) => true,
            _ => false,
        }
    }
}

impl From<Element> for Child {
    fn from(value: Element) -> Self {
        Child::Element(value)
    }
}

impl From<&str> for Child {
    fn from(value: &str) -> Self {
        Child::Text(value.into())
    }
}

impl From<String> for Child {
    fn from(value: String) -> Self {
        Child::Text(value.into())
    }
}

impl From<Rc<str>> for Child {
    fn from(value: Rc<str>) -> Self {
        Child::Text(value)
    }
}

impl From<i64> for Child {
    fn from(value: i64) -> Self {
        Child::Text(value.to_string().into())
    }
}

impl From<Vec<Child>> for Child {
    fn from(value: Vec<Child>) -> Self {
        Child::List(value)
    }
}

impl From<Vec<Element>> for Child {
    fn from(value: Vec<Element>) -> Self {
        Child::List(value.into_iter().map(Child::Element).collect())
    }
}

impl<T: Into<Child>> From<Option<T>> for Child {
    fn from(value: Option<T>) -> Self {
        value.map_or(Child::Empty, Into::into)
    }
}

impl From<()> for Child {
    fn from(_: ()) -> Self {
        Child::Empty
    }
}

/// Host element of type `tag`.
pub fn host(tag: &str, props: Props) -> Element {
    Element::new(ElementType::Host(tag.into()), props)
}

pub fn text(content: impl Into<Rc<str>>) -> Child {
    Child::Text(content.into())
}

pub fn fragment(children: Vec<Child>) -> Element {
    Element::new(ElementType::Fragment, Props::new().with_children(children))
}
